use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

// Command ids (SMPP v3.4 section 5.1.2.1)
pub const GENERIC_NACK: u32 = 0x8000_0000;
pub const SUBMIT_SM: u32 = 0x0000_0004;
pub const SUBMIT_SM_RESP: u32 = 0x8000_0004;
pub const DELIVER_SM: u32 = 0x0000_0005;
pub const DELIVER_SM_RESP: u32 = 0x8000_0005;
pub const UNBIND: u32 = 0x0000_0006;
pub const UNBIND_RESP: u32 = 0x8000_0006;
pub const BIND_TRANSCEIVER: u32 = 0x0000_0009;
pub const BIND_TRANSCEIVER_RESP: u32 = 0x8000_0009;
pub const ENQUIRE_LINK: u32 = 0x0000_0015;
pub const ENQUIRE_LINK_RESP: u32 = 0x8000_0015;
pub const DATA_SM: u32 = 0x0000_0103;
pub const DATA_SM_RESP: u32 = 0x8000_0103;

pub const HEADER_LEN: usize = 16;

/// Upper bound accepted for a single PDU, header included
pub const MAX_PDU_LEN: usize = 64 * 1024;

pub const INTERFACE_VERSION: u8 = 0x34;

// C-octet string limits, terminating NUL included
const MAX_ADDRESS_LEN: usize = 21;
const MAX_SYSTEM_ID_LEN: usize = 16;
const MAX_PASSWORD_LEN: usize = 9;
const MAX_SYSTEM_TYPE_LEN: usize = 13;
const MAX_MESSAGE_ID_LEN: usize = 65;
const MAX_SERVICE_TYPE_LEN: usize = 6;
const MAX_TIME_LEN: usize = 17;

/// Longest `short_message` the octet-length field can describe
pub const MAX_SHORT_MESSAGE_LEN: usize = 254;

// Type of number / numbering plan indicator values used on this link
pub const TON_INTERNATIONAL: u8 = 1;
pub const TON_NETWORK_SPECIFIC: u8 = 3;
pub const TON_ALPHANUMERIC: u8 = 5;
pub const NPI_UNKNOWN: u8 = 0;
pub const NPI_ISDN: u8 = 1;

/// esm_class bit announcing a user data header in `short_message`
pub const ESM_CLASS_UDHI: u8 = 0x40;

#[derive(Error, Debug)]
pub enum PduError {
    #[error("PDU truncated while reading {0}")]
    Truncated(&'static str),

    #[error("invalid command_length {0}")]
    InvalidLength(usize),

    #[error("{field} exceeds {max} octets")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("{0} is missing its NUL terminator")]
    Unterminated(&'static str),

    #[error("{0} is not valid ASCII")]
    InvalidString(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// command_status of a PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandStatus(pub u32);

impl CommandStatus {
    pub const ESME_ROK: Self = Self(0x0000_0000);
    pub const ESME_RINVMSGLEN: Self = Self(0x0000_0001);
    pub const ESME_RINVCMDLEN: Self = Self(0x0000_0002);
    pub const ESME_RINVCMDID: Self = Self(0x0000_0003);
    pub const ESME_RINVBNDSTS: Self = Self(0x0000_0004);
    pub const ESME_RALYBND: Self = Self(0x0000_0005);
    pub const ESME_RSYSERR: Self = Self(0x0000_0008);
    pub const ESME_RINVSRCADR: Self = Self(0x0000_000A);
    pub const ESME_RINVDSTADR: Self = Self(0x0000_000B);
    pub const ESME_RBINDFAIL: Self = Self(0x0000_000D);
    pub const ESME_RINVPASWD: Self = Self(0x0000_000E);
    pub const ESME_RINVSYSID: Self = Self(0x0000_000F);
    pub const ESME_RMSGQFUL: Self = Self(0x0000_0014);
    pub const ESME_RSUBMITFAIL: Self = Self(0x0000_0045);
    pub const ESME_RTHROTTLED: Self = Self(0x0000_0058);
    pub const ESME_RX_P_APPN: Self = Self(0x0000_0064);

    pub fn is_ok(&self) -> bool {
        *self == Self::ESME_ROK
    }

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::ESME_ROK => "ESME_ROK",
            Self::ESME_RINVMSGLEN => "ESME_RINVMSGLEN",
            Self::ESME_RINVCMDLEN => "ESME_RINVCMDLEN",
            Self::ESME_RINVCMDID => "ESME_RINVCMDID",
            Self::ESME_RINVBNDSTS => "ESME_RINVBNDSTS",
            Self::ESME_RALYBND => "ESME_RALYBND",
            Self::ESME_RSYSERR => "ESME_RSYSERR",
            Self::ESME_RINVSRCADR => "ESME_RINVSRCADR",
            Self::ESME_RINVDSTADR => "ESME_RINVDSTADR",
            Self::ESME_RBINDFAIL => "ESME_RBINDFAIL",
            Self::ESME_RINVPASWD => "ESME_RINVPASWD",
            Self::ESME_RINVSYSID => "ESME_RINVSYSID",
            Self::ESME_RMSGQFUL => "ESME_RMSGQFUL",
            Self::ESME_RSUBMITFAIL => "ESME_RSUBMITFAIL",
            Self::ESME_RTHROTTLED => "ESME_RTHROTTLED",
            Self::ESME_RX_P_APPN => "ESME_RX_P_APPN",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

/// Source or destination address triple
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    pub ton: u8,
    pub npi: u8,
    pub address: String,
}

impl Address {
    pub fn new(ton: u8, npi: u8, address: impl Into<String>) -> Result<Self, PduError> {
        let address = address.into();
        if address.len() >= MAX_ADDRESS_LEN {
            return Err(PduError::FieldTooLong {
                field: "address",
                max: MAX_ADDRESS_LEN - 1,
            });
        }
        if !address.is_ascii() {
            return Err(PduError::InvalidString("address"));
        }
        Ok(Self { ton, npi, address })
    }

    /// Sender address: a positive integer is a network-specific number,
    /// anything else an alphanumeric sender id
    pub fn sender(nick_name: &str) -> Result<Self, PduError> {
        let numeric = nick_name.parse::<u64>().map(|n| n > 0).unwrap_or(false);
        let ton = if numeric {
            TON_NETWORK_SPECIFIC
        } else {
            TON_ALPHANUMERIC
        };
        Self::new(ton, NPI_UNKNOWN, nick_name)
    }

    /// Recipient address in international ISDN format
    pub fn recipient(msisdn: &str) -> Result<Self, PduError> {
        Self::new(TON_INTERNATIONAL, NPI_ISDN, msisdn)
    }
}

/// Optional parameter appended after the mandatory body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Bytes,
}

/// Body shared by submit_sm and deliver_sm
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShortMessage {
    pub service_type: String,
    pub source: Address,
    pub destination: Address,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub tlvs: Vec<Tlv>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTransceiver {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    BindTransceiver(BindTransceiver),
    BindTransceiverResp { system_id: String },
    SubmitSm(ShortMessage),
    SubmitSmResp { message_id: String },
    DeliverSm(ShortMessage),
    DeliverSmResp,
    DataSm { body: Bytes },
    DataSmResp { message_id: String },
    EnquireLink,
    EnquireLinkResp,
    Unbind,
    UnbindResp,
    GenericNack,
    Other { command_id: u32, body: Bytes },
    /// Correctly framed PDU whose body could not be decoded
    Invalid { command_id: u32, reason: String },
}

impl Pdu {
    pub fn command_id(&self) -> u32 {
        match self {
            Pdu::BindTransceiver(_) => BIND_TRANSCEIVER,
            Pdu::BindTransceiverResp { .. } => BIND_TRANSCEIVER_RESP,
            Pdu::SubmitSm(_) => SUBMIT_SM,
            Pdu::SubmitSmResp { .. } => SUBMIT_SM_RESP,
            Pdu::DeliverSm(_) => DELIVER_SM,
            Pdu::DeliverSmResp => DELIVER_SM_RESP,
            Pdu::DataSm { .. } => DATA_SM,
            Pdu::DataSmResp { .. } => DATA_SM_RESP,
            Pdu::EnquireLink => ENQUIRE_LINK,
            Pdu::EnquireLinkResp => ENQUIRE_LINK_RESP,
            Pdu::Unbind => UNBIND,
            Pdu::UnbindResp => UNBIND_RESP,
            Pdu::GenericNack => GENERIC_NACK,
            Pdu::Other { command_id, .. } | Pdu::Invalid { command_id, .. } => *command_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Pdu::BindTransceiver(_) => "bind_transceiver",
            Pdu::BindTransceiverResp { .. } => "bind_transceiver_resp",
            Pdu::SubmitSm(_) => "submit_sm",
            Pdu::SubmitSmResp { .. } => "submit_sm_resp",
            Pdu::DeliverSm(_) => "deliver_sm",
            Pdu::DeliverSmResp => "deliver_sm_resp",
            Pdu::DataSm { .. } => "data_sm",
            Pdu::DataSmResp { .. } => "data_sm_resp",
            Pdu::EnquireLink => "enquire_link",
            Pdu::EnquireLinkResp => "enquire_link_resp",
            Pdu::Unbind => "unbind",
            Pdu::UnbindResp => "unbind_resp",
            Pdu::GenericNack => "generic_nack",
            Pdu::Other { .. } => "other",
            Pdu::Invalid { .. } => "invalid",
        }
    }
}

/// A complete PDU: header fields plus decoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub pdu: Pdu,
}

impl Frame {
    pub fn new(sequence_number: u32, pdu: Pdu) -> Self {
        Self {
            command_status: CommandStatus::ESME_ROK,
            sequence_number,
            pdu,
        }
    }

    pub fn with_status(mut self, status: CommandStatus) -> Self {
        self.command_status = status;
        self
    }

    /// Append the wire form of this frame to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), PduError> {
        let start = dst.len();
        dst.put_u32(0);
        dst.put_u32(self.pdu.command_id());
        dst.put_u32(self.command_status.0);
        dst.put_u32(self.sequence_number);

        match &self.pdu {
            Pdu::BindTransceiver(bind) => {
                put_cstring(dst, &bind.system_id, MAX_SYSTEM_ID_LEN, "system_id")?;
                put_cstring(dst, &bind.password, MAX_PASSWORD_LEN, "password")?;
                put_cstring(dst, &bind.system_type, MAX_SYSTEM_TYPE_LEN, "system_type")?;
                dst.put_u8(INTERFACE_VERSION);
                dst.put_u8(bind.addr_ton);
                dst.put_u8(bind.addr_npi);
                put_cstring(dst, &bind.address_range, MAX_ADDRESS_LEN * 2, "address_range")?;
            }
            Pdu::BindTransceiverResp { system_id } => {
                put_cstring(dst, system_id, MAX_SYSTEM_ID_LEN, "system_id")?;
            }
            Pdu::SubmitSm(sm) | Pdu::DeliverSm(sm) => encode_short_message(dst, sm)?,
            Pdu::SubmitSmResp { message_id } | Pdu::DataSmResp { message_id } => {
                put_cstring(dst, message_id, MAX_MESSAGE_ID_LEN, "message_id")?;
            }
            Pdu::DeliverSmResp => {
                // message_id is unused and always NULL
                dst.put_u8(0);
            }
            Pdu::DataSm { body } | Pdu::Other { body, .. } => dst.put_slice(body),
            Pdu::EnquireLink
            | Pdu::EnquireLinkResp
            | Pdu::Unbind
            | Pdu::UnbindResp
            | Pdu::GenericNack
            | Pdu::Invalid { .. } => {}
        }

        let len = dst.len() - start;
        if len > MAX_PDU_LEN {
            return Err(PduError::InvalidLength(len));
        }
        dst[start..start + 4].copy_from_slice(&(len as u32).to_be_bytes());
        Ok(())
    }

    /// Decode one complete PDU (header included)
    pub fn decode(mut buf: Bytes) -> Result<Self, PduError> {
        if buf.len() < HEADER_LEN {
            return Err(PduError::Truncated("header"));
        }
        let command_length = buf.get_u32() as usize;
        if command_length != buf.len() + 4 {
            return Err(PduError::InvalidLength(command_length));
        }
        let command_id = buf.get_u32();
        let command_status = CommandStatus(buf.get_u32());
        let sequence_number = buf.get_u32();

        let pdu = match command_id {
            BIND_TRANSCEIVER => {
                let system_id = get_cstring(&mut buf, MAX_SYSTEM_ID_LEN, "system_id")?;
                let password = get_cstring(&mut buf, MAX_PASSWORD_LEN, "password")?;
                let system_type = get_cstring(&mut buf, MAX_SYSTEM_TYPE_LEN, "system_type")?;
                let _interface_version = get_u8(&mut buf, "interface_version")?;
                Pdu::BindTransceiver(BindTransceiver {
                    system_id,
                    password,
                    system_type,
                    addr_ton: get_u8(&mut buf, "addr_ton")?,
                    addr_npi: get_u8(&mut buf, "addr_npi")?,
                    address_range: get_cstring(&mut buf, MAX_ADDRESS_LEN * 2, "address_range")?,
                })
            }
            // Error responses may omit the body entirely
            BIND_TRANSCEIVER_RESP => Pdu::BindTransceiverResp {
                system_id: get_optional_cstring(&mut buf, MAX_SYSTEM_ID_LEN, "system_id")?,
            },
            SUBMIT_SM => Pdu::SubmitSm(decode_short_message(&mut buf)?),
            SUBMIT_SM_RESP => Pdu::SubmitSmResp {
                message_id: get_optional_cstring(&mut buf, MAX_MESSAGE_ID_LEN, "message_id")?,
            },
            DELIVER_SM => Pdu::DeliverSm(decode_short_message(&mut buf)?),
            DELIVER_SM_RESP => Pdu::DeliverSmResp,
            DATA_SM => Pdu::DataSm { body: buf.split_off(0) },
            DATA_SM_RESP => Pdu::DataSmResp {
                message_id: get_optional_cstring(&mut buf, MAX_MESSAGE_ID_LEN, "message_id")?,
            },
            ENQUIRE_LINK => Pdu::EnquireLink,
            ENQUIRE_LINK_RESP => Pdu::EnquireLinkResp,
            UNBIND => Pdu::Unbind,
            UNBIND_RESP => Pdu::UnbindResp,
            GENERIC_NACK => Pdu::GenericNack,
            other => Pdu::Other {
                command_id: other,
                body: buf.split_off(0),
            },
        };

        Ok(Self {
            command_status,
            sequence_number,
            pdu,
        })
    }
}

fn encode_short_message(dst: &mut BytesMut, sm: &ShortMessage) -> Result<(), PduError> {
    if sm.short_message.len() > MAX_SHORT_MESSAGE_LEN {
        return Err(PduError::FieldTooLong {
            field: "short_message",
            max: MAX_SHORT_MESSAGE_LEN,
        });
    }

    put_cstring(dst, &sm.service_type, MAX_SERVICE_TYPE_LEN, "service_type")?;
    put_address(dst, &sm.source, "source_addr")?;
    put_address(dst, &sm.destination, "destination_addr")?;
    dst.put_u8(sm.esm_class);
    dst.put_u8(sm.protocol_id);
    dst.put_u8(sm.priority_flag);
    put_cstring(dst, &sm.schedule_delivery_time, MAX_TIME_LEN, "schedule_delivery_time")?;
    put_cstring(dst, &sm.validity_period, MAX_TIME_LEN, "validity_period")?;
    dst.put_u8(sm.registered_delivery);
    dst.put_u8(sm.replace_if_present_flag);
    dst.put_u8(sm.data_coding);
    dst.put_u8(sm.sm_default_msg_id);
    dst.put_u8(sm.short_message.len() as u8);
    dst.put_slice(&sm.short_message);

    for tlv in &sm.tlvs {
        dst.put_u16(tlv.tag);
        dst.put_u16(tlv.value.len() as u16);
        dst.put_slice(&tlv.value);
    }
    Ok(())
}

fn decode_short_message(buf: &mut Bytes) -> Result<ShortMessage, PduError> {
    let service_type = get_cstring(buf, MAX_SERVICE_TYPE_LEN, "service_type")?;
    let source = get_address(buf, "source_addr")?;
    let destination = get_address(buf, "destination_addr")?;
    let esm_class = get_u8(buf, "esm_class")?;
    let protocol_id = get_u8(buf, "protocol_id")?;
    let priority_flag = get_u8(buf, "priority_flag")?;
    let schedule_delivery_time = get_cstring(buf, MAX_TIME_LEN, "schedule_delivery_time")?;
    let validity_period = get_cstring(buf, MAX_TIME_LEN, "validity_period")?;
    let registered_delivery = get_u8(buf, "registered_delivery")?;
    let replace_if_present_flag = get_u8(buf, "replace_if_present_flag")?;
    let data_coding = get_u8(buf, "data_coding")?;
    let sm_default_msg_id = get_u8(buf, "sm_default_msg_id")?;
    let sm_length = get_u8(buf, "sm_length")? as usize;
    if buf.remaining() < sm_length {
        return Err(PduError::Truncated("short_message"));
    }
    let short_message = buf.split_to(sm_length);

    let mut tlvs = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 4 {
            return Err(PduError::Truncated("tlv header"));
        }
        let tag = buf.get_u16();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(PduError::Truncated("tlv value"));
        }
        tlvs.push(Tlv {
            tag,
            value: buf.split_to(len),
        });
    }

    Ok(ShortMessage {
        service_type,
        source,
        destination,
        esm_class,
        protocol_id,
        priority_flag,
        schedule_delivery_time,
        validity_period,
        registered_delivery,
        replace_if_present_flag,
        data_coding,
        sm_default_msg_id,
        short_message,
        tlvs,
    })
}

fn put_address(dst: &mut BytesMut, addr: &Address, field: &'static str) -> Result<(), PduError> {
    dst.put_u8(addr.ton);
    dst.put_u8(addr.npi);
    put_cstring(dst, &addr.address, MAX_ADDRESS_LEN, field)
}

fn get_address(buf: &mut Bytes, field: &'static str) -> Result<Address, PduError> {
    Ok(Address {
        ton: get_u8(buf, field)?,
        npi: get_u8(buf, field)?,
        address: get_cstring(buf, MAX_ADDRESS_LEN, field)?,
    })
}

fn put_cstring(
    dst: &mut BytesMut,
    value: &str,
    max: usize,
    field: &'static str,
) -> Result<(), PduError> {
    if value.len() >= max {
        return Err(PduError::FieldTooLong {
            field,
            max: max - 1,
        });
    }
    if !value.is_ascii() {
        return Err(PduError::InvalidString(field));
    }
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
    Ok(())
}

fn get_u8(buf: &mut Bytes, field: &'static str) -> Result<u8, PduError> {
    if !buf.has_remaining() {
        return Err(PduError::Truncated(field));
    }
    Ok(buf.get_u8())
}

fn get_cstring(buf: &mut Bytes, max: usize, field: &'static str) -> Result<String, PduError> {
    let nul = buf
        .iter()
        .take(max)
        .position(|b| *b == 0)
        .ok_or_else(|| {
            if buf.len() < max {
                PduError::Unterminated(field)
            } else {
                PduError::FieldTooLong {
                    field,
                    max: max - 1,
                }
            }
        })?;
    let raw = buf.split_to(nul);
    buf.advance(1);
    String::from_utf8(raw.to_vec()).map_err(|_| PduError::InvalidString(field))
}

fn get_optional_cstring(
    buf: &mut Bytes,
    max: usize,
    field: &'static str,
) -> Result<String, PduError> {
    if buf.has_remaining() {
        get_cstring(buf, max, field)
    } else {
        Ok(String::new())
    }
}
