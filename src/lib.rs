//! cwlink: Morse keying events over IP with the operator's fist intact.
//!
//! The send path runs paddle or text input through the iambic keyer into
//! duration/timestamp-encoded wire events; the receive path reconstructs
//! the sender's timing through a sequence tracker, a state validator, and
//! an adaptive jitter buffer feeding a playout worker.

pub mod buffer;
pub mod error;
pub mod event;
pub mod keyer;
pub mod morse;
pub(crate) mod playout;
pub mod protocol;
pub mod sender;
pub mod session;
pub mod sink;
pub mod stats;
pub mod timing;
pub mod tracker;
pub mod transport;
pub mod validator;

pub use buffer::{BufferAdvice, BufferedEvent, Discipline, JitterBuffer, Push};
pub use error::{Error, Result};
pub use event::{Event, KeyState, SessionEvent};
pub use keyer::{IambicKeyer, IambicMode, KeyTransition, KeyerConfig, PaddleInput};
pub use protocol::{DatagramCodec, Peer, RelayMessage, StreamCodec, WireMode};
pub use sender::{Sender, SenderBuilder};
pub use session::{Session, SessionBuilder};
pub use sink::{EventSink, KeyRecord, NullSink, RecordingSink};
pub use stats::{SessionStats, StatsSnapshot};
pub use tracker::{Arrival, SequenceTracker};
pub use transport::{MockLink, TcpLink, Transport, UdpLink};
pub use validator::StateValidator;
