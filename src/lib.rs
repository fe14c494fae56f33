//! Share one non-seekable byte stream between several concurrent readers.
//!
//! [`StreamFanout`] reads a source into a bounded circular buffer and hands
//! out [`ReaderHandle`]s that each see the full stream. A typical use is
//! storing an upload while extracting metadata from the same bytes, without
//! holding the whole upload in memory.
//!
//! ```
//! use std::io::{Cursor, Read};
//! use std::thread;
//! use stream_fanout::StreamFanout;
//!
//! let fanout = StreamFanout::new(Cursor::new(b"Hello, World!".to_vec()));
//! let mut a = fanout.new_reader().unwrap();
//! let mut b = fanout.new_reader().unwrap();
//!
//! thread::scope(|s| {
//!     let ta = s.spawn(move || {
//!         let mut out = String::new();
//!         a.read_to_string(&mut out).map(|_| out)
//!     });
//!     let tb = s.spawn(move || {
//!         let mut out = String::new();
//!         b.read_to_string(&mut out).map(|_| out)
//!     });
//!
//!     fanout.run().unwrap();
//!     assert_eq!(ta.join().unwrap().unwrap(), "Hello, World!");
//!     assert_eq!(tb.join().unwrap().unwrap(), "Hello, World!");
//! });
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod fanout;
pub mod sinks;

pub use config::FanoutConfig;
pub use error::{FanoutError, Result};
pub use fanout::{
    ConsumerOutcome, FanoutPipeline, FanoutStats, PipelineReport, ReaderHandle, StreamFanout,
};
