// Domain-layer modules and shared errors/models
pub mod entitlements {
    pub use crate::entitlements::*;
}

pub mod ledger {
    pub use crate::ledger::*;
}

pub mod search_service {
    pub use crate::search_service::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
