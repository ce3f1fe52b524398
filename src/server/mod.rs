//! Reference exchange service
//!
//! | Method | Path                | Success          |
//! |--------|---------------------|------------------|
//! | POST   | `/exchange`         | 201              |
//! | POST   | `/exchange/consume` | 200 `{payload}`  |
//! | GET    | `/health`           | 200 with stats   |

pub mod http;

pub use http::{run, serve, AppState};
