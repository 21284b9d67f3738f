/// Credential extraction from container environments
///
/// Each engine has a fixed table of the variables its official image
/// understands. Within a field the first variable present wins, and a root
/// password always beats a plain user password for MySQL-family engines.

use std::fmt;
use thiserror::Error;

use crate::core::classifier::{ContainerInfo, EngineKind};
use crate::utils::{env, env_lookup};
use crate::utils::{
    DEFAULT_DB_HOST, MONGO_DEFAULT_PORT, MYSQL_DEFAULT_PORT, MYSQL_ROOT_USER,
    POSTGRES_DEFAULT_PORT, POSTGRES_DEFAULT_USER,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("missing {field} for {engine}: none of {} is set", .variables.join(", "))]
    Missing {
        engine: EngineKind,
        field: &'static str,
        variables: Vec<&'static str>,
    },
    #[error("no credential table for engine {0}")]
    UnsupportedEngine(EngineKind),
}

/// Connection settings for one dump. Never logged: `Debug` masks the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub engine: EngineKind,
    /// `None` only for MongoDB without authentication
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("engine", &self.engine)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|p| "*".repeat(p.chars().count())))
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Variables consulted for each field, in precedence order
struct LookupTable {
    root_password: &'static [&'static str],
    user: &'static [&'static str],
    password: &'static [&'static str],
    database: &'static [&'static str],
}

const MYSQL_TABLE: LookupTable = LookupTable {
    root_password: &[env::MYSQL_ROOT_PASSWORD, env::MARIADB_ROOT_PASSWORD],
    user: &[env::MYSQL_USER, env::MARIADB_USER],
    password: &[env::MYSQL_PASSWORD, env::MARIADB_PASSWORD],
    database: &[env::MYSQL_DATABASE, env::MARIADB_DATABASE],
};

const MARIADB_TABLE: LookupTable = LookupTable {
    root_password: &[env::MARIADB_ROOT_PASSWORD, env::MYSQL_ROOT_PASSWORD],
    user: &[env::MARIADB_USER, env::MYSQL_USER],
    password: &[env::MARIADB_PASSWORD, env::MYSQL_PASSWORD],
    database: &[env::MARIADB_DATABASE, env::MYSQL_DATABASE],
};

const POSTGRES_TABLE: LookupTable = LookupTable {
    root_password: &[],
    user: &[env::POSTGRES_USER],
    password: &[env::POSTGRES_PASSWORD],
    database: &[env::POSTGRES_DB],
};

const MONGO_TABLE: LookupTable = LookupTable {
    root_password: &[],
    user: &[env::MONGO_ROOT_USERNAME],
    password: &[env::MONGO_ROOT_PASSWORD],
    database: &[env::MONGO_DATABASE],
};

fn first_of(vars: &[String], names: &[&'static str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| env_lookup(vars, name))
        .map(str::to_string)
}

fn missing(engine: EngineKind, field: &'static str, variables: &[&'static str]) -> CredentialError {
    CredentialError::Missing {
        engine,
        field,
        variables: variables.to_vec(),
    }
}

/// Build the credentials needed to dump `container`
pub fn extract(container: &ContainerInfo) -> Result<Credentials, CredentialError> {
    let engine = container
        .engine()
        .ok_or(CredentialError::UnsupportedEngine(EngineKind::Unrecognized))?;
    extract_for(engine, &container.env)
}

pub fn extract_for(engine: EngineKind, vars: &[String]) -> Result<Credentials, CredentialError> {
    match engine {
        EngineKind::MySql => mysql_family(engine, &MYSQL_TABLE, vars),
        EngineKind::MariaDb => mysql_family(engine, &MARIADB_TABLE, vars),
        EngineKind::PostgreSql => {
            let table = &POSTGRES_TABLE;
            Ok(Credentials {
                engine,
                user: Some(
                    first_of(vars, table.user).unwrap_or_else(|| POSTGRES_DEFAULT_USER.to_string()),
                ),
                password: first_of(vars, table.password),
                database: first_of(vars, table.database),
                host: DEFAULT_DB_HOST.to_string(),
                port: POSTGRES_DEFAULT_PORT,
            })
        }
        EngineKind::MongoDb => {
            let table = &MONGO_TABLE;
            let user = first_of(vars, table.user);
            let password = first_of(vars, table.password);
            // Without a root user the image runs with authentication disabled
            if user.is_some() && password.is_none() {
                return Err(missing(engine, "password", table.password));
            }
            Ok(Credentials {
                engine,
                user,
                password,
                database: first_of(vars, table.database),
                host: DEFAULT_DB_HOST.to_string(),
                port: MONGO_DEFAULT_PORT,
            })
        }
        EngineKind::Unrecognized => Err(CredentialError::UnsupportedEngine(engine)),
    }
}

fn mysql_family(
    engine: EngineKind,
    table: &LookupTable,
    vars: &[String],
) -> Result<Credentials, CredentialError> {
    let database = first_of(vars, table.database);

    let (user, password) = match first_of(vars, table.root_password) {
        Some(root_password) => (MYSQL_ROOT_USER.to_string(), root_password),
        None => {
            let user = first_of(vars, table.user);
            let password = first_of(vars, table.password);
            match (user, password) {
                (Some(user), Some(password)) => (user, password),
                // Report the root variable: full dumps need root access
                _ => return Err(missing(engine, "root password", table.root_password)),
            }
        }
    };

    Ok(Credentials {
        engine,
        user: Some(user),
        password: Some(password),
        database,
        host: DEFAULT_DB_HOST.to_string(),
        port: MYSQL_DEFAULT_PORT,
    })
}
