/// Container classification
///
/// Tags every discovered container as a database (with its engine) or an
/// application, from the image reference alone.

use serde::Serialize;
use std::fmt;

use crate::core::runtime::RawContainer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    MySql,
    MariaDb,
    PostgreSql,
    MongoDb,
    Unrecognized,
}

impl EngineKind {
    /// Slug used in dump file names
    pub fn slug(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysql",
            EngineKind::MariaDb => "mariadb",
            EngineKind::PostgreSql => "postgresql",
            EngineKind::MongoDb => "mongodb",
            EngineKind::Unrecognized => "unknown",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::MySql => "MySQL",
            EngineKind::MariaDb => "MariaDB",
            EngineKind::PostgreSql => "PostgreSQL",
            EngineKind::MongoDb => "MongoDB",
            EngineKind::Unrecognized => "Unrecognized",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "role", content = "engine", rename_all = "lowercase")]
pub enum Role {
    Application,
    Database(EngineKind),
}

impl Role {
    pub fn engine(&self) -> Option<EngineKind> {
        match self {
            Role::Database(engine) => Some(*engine),
            Role::Application => None,
        }
    }

    pub fn is_database(&self) -> bool {
        matches!(self, Role::Database(_))
    }
}

/// Image substrings, most specific first: MariaDB images can mention mysql
const ENGINE_TABLE: &[(&str, EngineKind)] = &[
    ("mariadb", EngineKind::MariaDb),
    ("mysql", EngineKind::MySql),
    ("postgres", EngineKind::PostgreSql),
    ("mongo", EngineKind::MongoDb),
];

/// Snapshot of a running container for the duration of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub role: Role,
    /// `KEY=value` entries, read only by credential extraction
    pub env: Vec<String>,
}

impl ContainerInfo {
    pub fn engine(&self) -> Option<EngineKind> {
        self.role.engine()
    }

    pub fn is_database(&self) -> bool {
        self.role.is_database()
    }
}

/// Resolve the role of an image reference
pub fn classify_image(image: &str) -> Role {
    let image = image.to_lowercase();
    ENGINE_TABLE
        .iter()
        .find(|(needle, _)| image.contains(needle))
        .map(|(_, engine)| Role::Database(*engine))
        .unwrap_or(Role::Application)
}

/// Classify every discovered container, preserving discovery order
pub fn classify(containers: Vec<RawContainer>) -> Vec<ContainerInfo> {
    containers
        .into_iter()
        .map(|raw| ContainerInfo {
            role: classify_image(&raw.image),
            id: raw.id,
            name: raw.name,
            image: raw.image,
            running: true,
            env: raw.env,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_table() {
        assert_eq!(classify_image("mysql:8"), Role::Database(EngineKind::MySql));
        assert_eq!(classify_image("mariadb:11.4"), Role::Database(EngineKind::MariaDb));
        assert_eq!(classify_image("postgres:16-alpine"), Role::Database(EngineKind::PostgreSql));
        assert_eq!(classify_image("mongo:7"), Role::Database(EngineKind::MongoDb));
    }

    #[test]
    fn test_case_insensitive_and_registry_prefixes() {
        assert_eq!(
            classify_image("ghcr.io/acme/PostgreSQL-custom:latest"),
            Role::Database(EngineKind::PostgreSql)
        );
        assert_eq!(
            classify_image("docker.io/library/MONGO@sha256:abcd"),
            Role::Database(EngineKind::MongoDb)
        );
        assert_eq!(classify_image("bitnami/mysql:8.0"), Role::Database(EngineKind::MySql));
    }

    #[test]
    fn test_mariadb_wins_over_mysql() {
        assert_eq!(
            classify_image("linuxserver/mariadb-mysql-compat"),
            Role::Database(EngineKind::MariaDb)
        );
        assert_eq!(
            classify_image("mysql-proxy/mariadb"),
            Role::Database(EngineKind::MariaDb)
        );
    }

    #[test]
    fn test_everything_else_is_application() {
        for image in ["nginx:1.25", "redis:7", "traefik", "", "ghcr.io/acme/api:2"] {
            assert_eq!(classify_image(image), Role::Application, "{}", image);
        }
    }

    #[test]
    fn test_classify_keeps_order_and_identity() {
        let raw = vec![
            RawContainer {
                id: "a1".into(),
                name: "web".into(),
                image: "nginx".into(),
                env: vec![],
                mounts: vec![],
            },
            RawContainer {
                id: "b2".into(),
                name: "db".into(),
                image: "mysql:8".into(),
                env: vec!["MYSQL_ROOT_PASSWORD=secret".into()],
                mounts: vec![],
            },
        ];

        let classified = classify(raw);
        assert_eq!(classified.len(), 2);
        assert_eq!(classified[0].name, "web");
        assert!(!classified[0].is_database());
        assert_eq!(classified[1].engine(), Some(EngineKind::MySql));
        assert_eq!(classified[1].env, vec!["MYSQL_ROOT_PASSWORD=secret".to_string()]);
        assert!(classified.iter().all(|c| c.running));
    }

    #[test]
    fn test_engine_slugs() {
        assert_eq!(EngineKind::MySql.slug(), "mysql");
        assert_eq!(EngineKind::MongoDb.to_string(), "MongoDB");
    }
}
