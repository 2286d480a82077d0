pub mod sqlite;

pub use sqlite::{
    run_migrations, DatabaseManager, SqliteConfigInstanceRepository, SqliteTaskBatchRepository,
};
