//! SMPP v3.4 protocol support for the operator link: PDU model, framing
//! codec, transceiver session, GSM/UCS2 encoding, segmentation and
//! delivery-receipt parsing.

pub mod codec;
pub mod encoding;
pub mod pdu;
pub mod receipt;
pub mod segment;
pub mod session;

pub use codec::SmppCodec;
pub use encoding::DataCoding;
pub use pdu::{Address, CommandStatus, Frame, Pdu, PduError, ShortMessage};
pub use receipt::{parse_receipt, DeliveryReceipt, ReceiptError};
pub use segment::{segment_message, SegmentError};
pub use session::{
    bind, connect, Notification, SessionConfig, SessionDriver, SessionError, SessionHandle,
};
