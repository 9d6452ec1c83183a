mod schema;
mod trailers;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, NewTrailer, TableName, TrailerRecord};
