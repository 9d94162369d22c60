// Library root
// -----------
// A reviewer client for addons.mozilla.org. The binary (`main.rs`) only
// parses arguments and hands off to `cli`; everything else lives here so it
// can be tested without a terminal or a network.
//
// Module responsibilities:
// - `transport`, `session`, `auth`, `credentials`: HTTP with login walls
//   detected on every redirect hop and handled by re-authenticating, plus
//   the persisted session tokens.
// - `decode`: HTML pages to typed records. `paginate` walks "next" links.
// - `review`, `resolve`, `download`: review pages, version lookup and
//   saving files and sources to disk.
// - `listing`: queues and review logs.
// - `upload`: submissions and the validation state machine.
// - `admin`: the admin manage page.
// - `service`, `cli`, `ui`: the command surface and terminal prompts.
pub mod admin;
pub mod auth;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod decode;
pub mod download;
pub mod error;
pub mod listing;
pub mod paginate;
pub mod resolve;
pub mod review;
pub mod service;
pub mod session;
pub mod transport;
pub mod ui;
pub mod upload;

pub use error::{Error, Result};
