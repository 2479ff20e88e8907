//! Coordinating several backends over a single stream.
//!
//! # Available Patterns
//!
//! - [`PriorityRace`] - Every backend processes its own fork; the lowest-index
//!   accepted outcome wins and the rest are aborted
//! - [`FanoutWriter`] - Every chunk goes to every live [`Peer`]; the
//!   earliest-registered survivor is committed
//!
//! # Examples
//!
//! ## Racing with an external deadline
//!
//! ```no_run
//! # use std::time::Duration;
//! # use replicast::{AbortController, Error, stream};
//! # use replicast::multi::{PriorityRace, RunArgs};
//! # use bytes::Bytes;
//! # async fn example() {
//! let deadline = AbortController::new();
//! let race = PriorityRace::new(
//!         |args: RunArgs<String>| async move { stream::collect_bytes(args.branch).await },
//!         |_: &String, body: &Vec<u8>, index| (!body.is_empty()).then_some(index),
//!     )
//!     .signal(deadline.signal());
//!
//! let timer = deadline.clone();
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     timer.abort(Error::Canceled("deadline exceeded".into()));
//! });
//!
//! let source = stream::from_bytes(vec![Bytes::from("payload")]);
//! let winner = race.run(vec!["eu".to_string(), "us".to_string()], source).await;
//! # }
//! ```

mod fanout;
mod race;

pub use fanout::{FanoutWrite, FanoutWriter, Peer, PeerStream};
pub use race::{PriorityRace, RunArgs};
