//! Teammate lookup: cached reference lists and player search.
//!
//! Every accepted search filter can also be published to an analytics
//! topic. That write is best-effort and never fails the search.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::broker::Producer;
use crate::cache::ReferenceCache;
use crate::domain::{
    NewPlayer, PlayerProfile, ReferenceCategory, ReferenceItem, RegistryError, TeammateFilter,
};
use crate::store::TeammateStore;

#[derive(Clone)]
pub struct TeammateDirectory {
    store: Arc<dyn TeammateStore>,
    references: ReferenceCache,
    filters: Option<Arc<dyn Producer>>,
}

impl TeammateDirectory {
    pub fn new(store: Arc<dyn TeammateStore>, references: ReferenceCache) -> Self {
        Self {
            store,
            references,
            filters: None,
        }
    }

    /// Publish accepted search filters through `producer`
    pub fn with_filter_producer(mut self, producer: Arc<dyn Producer>) -> Self {
        self.filters = Some(producer);
        self
    }

    /// Reference list for a category, read through the cache
    #[instrument(skip(self))]
    pub async fn references(&self, category: ReferenceCategory) -> Result<Vec<ReferenceItem>, RegistryError> {
        let store = Arc::clone(&self.store);
        self.references
            .get_or_load(category, move || async move {
                store
                    .list_reference(category)
                    .await
                    .map_err(RegistryError::from)
            })
            .await
    }

    /// Add a reference name and refresh the cached list
    #[instrument(skip(self))]
    pub async fn add_reference(&self, category: ReferenceCategory, name: &str) -> Result<i64, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidIdentifier {
                field: "name",
                value: name.to_string(),
            });
        }

        let id = self.store.insert_reference(category, name).await?;
        let items = self.store.list_reference(category).await?;
        self.references.set(category, &items).await;

        info!(%category, id, "Reference added");
        Ok(id)
    }

    #[instrument(skip(self, player), fields(username = %player.username))]
    pub async fn register_player(&self, player: &NewPlayer) -> Result<(), RegistryError> {
        if player.username.trim().is_empty() {
            return Err(RegistryError::InvalidIdentifier {
                field: "username",
                value: player.username.clone(),
            });
        }
        Ok(self.store.upsert_player(player).await?)
    }

    #[instrument(skip(self))]
    pub async fn search(&self, filter: &TeammateFilter) -> Result<Vec<PlayerProfile>, RegistryError> {
        filter.validate()?;
        self.publish_filter(filter).await;
        Ok(self.store.search_players(filter).await?)
    }

    async fn publish_filter(&self, filter: &TeammateFilter) {
        let Some(producer) = &self.filters else {
            return;
        };

        let payload = match serde_json::to_vec(filter) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize search filter");
                return;
            }
        };

        match producer.send(&payload).await {
            Ok(()) => debug!("Published search filter"),
            Err(e) => warn!(error = %e, "Failed to publish search filter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, BrokerError, MemoryBroker};
    use crate::cache::MemoryKv;
    use crate::store::SqliteStore;
    use std::time::Duration;

    fn directory() -> TeammateDirectory {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let references = ReferenceCache::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));
        TeammateDirectory::new(store, references)
    }

    #[tokio::test]
    async fn test_added_reference_is_visible_through_cache() {
        let directory = directory();

        // Prime the cache with the empty list
        assert!(directory.references(ReferenceCategory::Games).await.unwrap().is_empty());

        let id = directory.add_reference(ReferenceCategory::Games, "Factorio").await.unwrap();
        let games = directory.references(ReferenceCategory::Games).await.unwrap();
        assert_eq!(games, vec![ReferenceItem { id, name: "Factorio".into() }]);
    }

    #[tokio::test]
    async fn test_search_filters_and_resolves_names() {
        let directory = directory();
        let dota = directory.add_reference(ReferenceCategory::Games, "Dota 2").await.unwrap();
        let chess = directory.add_reference(ReferenceCategory::Games, "Chess").await.unwrap();
        let english = directory.add_reference(ReferenceCategory::Languages, "English").await.unwrap();

        for (username, age, game) in [("ana", 24, dota), ("bo", 31, dota), ("cy", 22, chess)] {
            directory
                .register_player(&NewPlayer {
                    username: username.into(),
                    age,
                    game_id: Some(game),
                    language_id: Some(english),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let found = directory
            .search(&TeammateFilter {
                age_min: 18,
                age_max: 30,
                game_id: Some(dota),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "ana");
        assert_eq!(found[0].game, "Dota 2");
        assert_eq!(found[0].language, "English");
        // Unset references resolve to empty names
        assert_eq!(found[0].genre, "");
    }

    #[tokio::test]
    async fn test_inverted_age_range_is_rejected() {
        let directory = directory();
        let err = directory
            .search(&TeammateFilter {
                age_min: 40,
                age_max: 20,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_search_publishes_filter() {
        let broker = MemoryBroker::new();
        let directory = directory().with_filter_producer(broker.producer("filter.data").await.unwrap());

        let filter = TeammateFilter {
            age_min: 18,
            age_max: 25,
            game_id: Some(3),
            ..Default::default()
        };
        directory.search(&filter).await.unwrap();

        let published = broker.messages("filter.data");
        assert_eq!(published.len(), 1);
        let sent: TeammateFilter = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(sent, filter);
    }

    #[tokio::test]
    async fn test_rejected_filter_is_not_published() {
        let broker = MemoryBroker::new();
        let directory = directory().with_filter_producer(broker.producer("filter.data").await.unwrap());

        let inverted = TeammateFilter {
            age_min: 40,
            age_max: 20,
            ..Default::default()
        };
        assert!(directory.search(&inverted).await.is_err());
        assert!(broker.messages("filter.data").is_empty());
    }

    #[tokio::test]
    async fn test_search_survives_publish_failure() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl Producer for Unreachable {
            async fn send(&self, _payload: &[u8]) -> Result<(), BrokerError> {
                Err(BrokerError::Backend("broker unreachable".into()))
            }
        }

        let directory = directory().with_filter_producer(Arc::new(Unreachable));
        let found = directory.search(&TeammateFilter::default()).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_blank_username_is_rejected() {
        let directory = directory();
        let err = directory.register_player(&NewPlayer::default()).await.unwrap_err();
        assert!(err.is_validation());
    }
}
