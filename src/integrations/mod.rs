//! External service integrations.

pub mod search_client {
    pub use crate::search_client::*;
}

pub mod place_details {
    pub use crate::place_details::*;
}

pub mod db_storage {
    pub use crate::db_storage::*;
}
