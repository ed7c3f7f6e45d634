//! Teammate subcommands.

use anyhow::Result;
use clap::Subcommand;

use crate::config::ResolvedConfig;
use crate::domain::{NewPlayer, TeammateFilter};

#[derive(Subcommand, Debug)]
pub enum TeammateCommands {
    /// Find players matching the filters
    Search {
        #[arg(long, default_value_t = 0)]
        age_min: u32,

        #[arg(long, default_value_t = 150)]
        age_max: u32,

        /// Game reference ID
        #[arg(long)]
        game: Option<i64>,

        /// Genre reference ID
        #[arg(long)]
        genre: Option<i64>,

        /// Language reference ID
        #[arg(long)]
        language: Option<i64>,
    },

    /// Create or update a player profile
    Register {
        username: String,

        #[arg(long)]
        age: u32,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        game: Option<i64>,

        #[arg(long)]
        genre: Option<i64>,

        #[arg(long)]
        language: Option<i64>,

        #[arg(long)]
        app: Option<i64>,
    },
}

pub async fn execute(cfg: &ResolvedConfig, command: TeammateCommands) -> Result<()> {
    let directory = super::teammate_directory(cfg).await?;

    match command {
        TeammateCommands::Search {
            age_min,
            age_max,
            game,
            genre,
            language,
        } => {
            let directory = match super::filter_producer(cfg).await {
                Some(producer) => directory.with_filter_producer(producer),
                None => directory,
            };
            let players = directory
                .search(&TeammateFilter {
                    age_min,
                    age_max,
                    game_id: game,
                    genre_id: genre,
                    language_id: language,
                })
                .await?;

            if players.is_empty() {
                println!("No matching players");
                return Ok(());
            }
            super::print_json(&players)
        }
        TeammateCommands::Register {
            username,
            age,
            description,
            game,
            genre,
            language,
            app,
        } => {
            directory
                .register_player(&NewPlayer {
                    username: username.clone(),
                    age,
                    description,
                    game_id: game,
                    genre_id: genre,
                    language_id: language,
                    app_id: app,
                })
                .await?;
            println!("Registered {}", username);
            Ok(())
        }
    }
}
