//! Parameterized player search query.
//!
//! Only fixed SQL fragments are ever appended to the statement text; every
//! caller-supplied value is bound as a numbered parameter.

use rusqlite::types::Value;

use crate::domain::TeammateFilter;

const BASE_SELECT: &str = "SELECT p.username, p.age, p.description,
        COALESCE(g.name, ''), COALESCE(ge.name, ''), COALESCE(a.name, ''), COALESCE(l.name, '')
    FROM players p
    LEFT JOIN games g ON p.game_id = g.id
    LEFT JOIN genres ge ON p.genre_id = ge.id
    LEFT JOIN apps a ON p.app_id = a.id
    LEFT JOIN languages l ON p.language_id = l.id
    WHERE p.age BETWEEN ?1 AND ?2";

/// A built statement plus its bound values
#[derive(Debug, Clone)]
pub struct PlayerQuery {
    sql: String,
    params: Vec<Value>,
}

impl PlayerQuery {
    pub fn from_filter(filter: &TeammateFilter) -> Self {
        let mut query = Self {
            sql: BASE_SELECT.to_string(),
            params: vec![
                Value::Integer(i64::from(filter.age_min)),
                Value::Integer(i64::from(filter.age_max)),
            ],
        };

        query.push_eq("p.game_id", filter.game_id);
        query.push_eq("p.genre_id", filter.genre_id);
        query.push_eq("p.language_id", filter.language_id);
        query.sql.push_str(" ORDER BY p.username");

        query
    }

    fn push_eq(&mut self, column: &'static str, value: Option<i64>) {
        if let Some(value) = value {
            self.params.push(Value::Integer(value));
            self.sql
                .push_str(&format!(" AND {} = ?{}", column, self.params.len()));
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}
