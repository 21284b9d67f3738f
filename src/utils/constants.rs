/// Well-known names and defaults shared across the backup pipeline
///
/// Environment variable names follow the conventions of the official
/// Docker Hub images for each engine.

use std::time::Duration;

/// Environment variables read from the database containers
pub mod env {
    pub const MYSQL_ROOT_PASSWORD: &str = "MYSQL_ROOT_PASSWORD";
    pub const MYSQL_USER: &str = "MYSQL_USER";
    pub const MYSQL_PASSWORD: &str = "MYSQL_PASSWORD";
    pub const MYSQL_DATABASE: &str = "MYSQL_DATABASE";

    pub const MARIADB_ROOT_PASSWORD: &str = "MARIADB_ROOT_PASSWORD";
    pub const MARIADB_USER: &str = "MARIADB_USER";
    pub const MARIADB_PASSWORD: &str = "MARIADB_PASSWORD";
    pub const MARIADB_DATABASE: &str = "MARIADB_DATABASE";

    pub const POSTGRES_USER: &str = "POSTGRES_USER";
    pub const POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
    pub const POSTGRES_DB: &str = "POSTGRES_DB";

    pub const MONGO_ROOT_USERNAME: &str = "MONGO_INITDB_ROOT_USERNAME";
    pub const MONGO_ROOT_PASSWORD: &str = "MONGO_INITDB_ROOT_PASSWORD";
    pub const MONGO_DATABASE: &str = "MONGO_INITDB_DATABASE";
}

/// Environment variables read by dockerbk itself
pub mod settings {
    pub const DESTINATION: &str = "DOCKERBK_DESTINATION";
    pub const VOLUMES_DIR: &str = "DOCKERBK_VOLUMES_DIR";
    pub const DUMP_TIMEOUT: &str = "DOCKERBK_DUMP_TIMEOUT";
    pub const STOP_TIMEOUT: &str = "DOCKERBK_STOP_TIMEOUT";
    pub const VERBOSE: &str = "DOCKERBK_VERBOSE";
}

pub const MYSQL_ROOT_USER: &str = "root";
pub const POSTGRES_DEFAULT_USER: &str = "postgres";
pub const MONGO_AUTH_DATABASE: &str = "admin";

// Exec environment carrying passwords so they stay out of the process list
pub const POSTGRES_PASSWORD_ENV: &str = "PGPASSWORD";
pub const MYSQL_PASSWORD_ENV: &str = "MYSQL_PWD";
pub const MONGO_CONFIG_ENV: &str = "DOCKERBK_MONGO_CONFIG";

pub const MYSQL_DEFAULT_PORT: u16 = 3306;
pub const POSTGRES_DEFAULT_PORT: u16 = 5432;
pub const MONGO_DEFAULT_PORT: u16 = 27017;

/// Dumps connect from inside the container
pub const DEFAULT_DB_HOST: &str = "localhost";

/// First MariaDB major version that ships `mariadb-dump` without the `mysqldump` alias
pub const MARIADB_DUMP_MIN_MAJOR: u32 = 11;

pub const SQL_EXTENSION: &str = "sql";
pub const MONGO_ARCHIVE_EXTENSION: &str = "archive";
pub const VOLUMES_ARCHIVE_PREFIX: &str = "volumes";
pub const VOLUMES_ARCHIVE_EXTENSION: &str = "tar.gz";

/// Used when the daemon does not report its data root
pub const DEFAULT_DOCKER_ROOT: &str = "/var/lib/docker";

/// Grace period handed to the daemon before it kills a stopping container
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes of stderr kept when a dump command fails
pub const STDERR_TAIL_BYTES: usize = 2048;

/// Timestamp layout used in every output file of a run
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
