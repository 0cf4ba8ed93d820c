mod schema;
mod sqlite_index_repository;

pub use schema::initialize_database;
pub use sqlite_index_repository::SqliteIndexRepository;
