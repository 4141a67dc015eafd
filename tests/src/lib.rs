//! # NetConsole Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── mock_server.rs   # Scripted WebSocket server
//! │   └── integration/     # End-to-end flows against the mock server
//! │       ├── correlation.rs
//! │       ├── lifecycle.rs
//! │       └── login.rs
//! └── benches/
//!     └── correlation_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p console-tests
//! cargo test -p console-tests integration::lifecycle::
//! cargo bench -p console-tests
//! ```

pub mod mock_server;
