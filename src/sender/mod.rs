pub mod connection;
pub mod serialization;
mod session;
pub mod sink;
pub mod state;
pub mod transport;
pub mod websocket;

pub use connection::{Connector, Endpoint, Frame, FrameReader, FrameWriter, TransportError};
pub use serialization::{DecodedRecord, SerializationError, decode_batch, encode_batch};
pub use sink::{BatchSink, DeliveryOutcome};
pub use state::ConnectionState;
pub use transport::{Transport, TransportConfig};
pub use websocket::{WsConnector, WsReader, WsWriter};
