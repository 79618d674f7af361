use crate::codec::SmppCodec;
use crate::pdu::{BindTransceiver, CommandStatus, Frame, Pdu, PduError, ShortMessage, DELIVER_SM};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the notification channel handed to the consumer
pub const NOTIFICATION_CAPACITY: usize = 100;

const OUTBOUND_CAPACITY: usize = 64;
const UNBIND_GRACE: Duration = Duration::from_secs(2);
const MAX_SEQUENCE: u32 = 0x7FFF_FFFF;
/// Driver-originated requests count down from `MAX_SEQUENCE` to here, away
/// from submit_sm numbers which count up from 1
const DRIVER_SEQUENCE_FLOOR: u32 = 0x7000_0000;
const MIN_ENQUIRE_LINK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `host:port` of the operator's SMSC
    pub address: String,
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub bind_timeout: Duration,
    pub enquire_link_interval: Duration,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("bind rejected with {0}")]
    BindRejected(CommandStatus),

    #[error("unexpected {0} while binding")]
    UnexpectedPdu(&'static str),

    #[error("session is closed")]
    Closed,

    #[error("failed to write PDU: {0}")]
    Write(String),

    #[error("operator closed the connection")]
    ConnectionLost,

    #[error("operator unbound the session")]
    Unbound,

    #[error(transparent)]
    Pdu(#[from] PduError),
}

/// Operator-originated events the worker has to correlate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// submit_sm_resp for the submit_sm carrying `sequence_number`
    SubmitAck {
        sequence_number: u32,
        command_status: CommandStatus,
        message_id: String,
    },
    /// deliver_sm, already acknowledged with deliver_sm_resp
    Delivery {
        sequence_number: u32,
        command_status: CommandStatus,
        message: ShortMessage,
    },
}

struct Outbound {
    frame: Frame,
    written: oneshot::Sender<Result<(), String>>,
}

/// Cloneable submit side of a bound session
#[derive(Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    /// Queue a submit_sm and wait until it has been written to the socket
    pub async fn submit(
        &self,
        sequence_number: u32,
        message: ShortMessage,
    ) -> Result<(), SessionError> {
        let (written, done) = oneshot::channel();
        self.outbound
            .send(Outbound {
                frame: Frame::new(sequence_number, Pdu::SubmitSm(message)),
                written,
            })
            .await
            .map_err(|_| SessionError::Closed)?;

        done.await
            .map_err(|_| SessionError::Closed)?
            .map_err(SessionError::Write)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Owns the connection; must be run for the session to make progress
pub struct SessionDriver<T> {
    framed: Framed<T, SmppCodec>,
    outbound: mpsc::Receiver<Outbound>,
    notifications: mpsc::Sender<Notification>,
    enquire_link_interval: Duration,
    sequence: u32,
}

pub type Session<T> = (SessionHandle, mpsc::Receiver<Notification>, SessionDriver<T>);

/// Open a TCP connection to the operator and bind as transceiver
pub async fn connect(config: &SessionConfig) -> Result<Session<TcpStream>, SessionError> {
    info!(address = %config.address, system_id = %config.system_id, "connecting to SMSC");

    let stream = timeout(config.bind_timeout, TcpStream::connect(&config.address))
        .await
        .map_err(|_| SessionError::Timeout("TCP connect"))?
        .map_err(|source| SessionError::Connect {
            address: config.address.clone(),
            source,
        })?;
    stream
        .set_nodelay(true)
        .map_err(|source| SessionError::Connect {
            address: config.address.clone(),
            source,
        })?;

    bind(stream, config).await
}

/// Bind as transceiver over an established transport
pub async fn bind<T>(io: T, config: &SessionConfig) -> Result<Session<T>, SessionError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, SmppCodec);

    framed
        .send(Frame::new(
            1,
            Pdu::BindTransceiver(BindTransceiver {
                system_id: config.system_id.clone(),
                password: config.password.clone(),
                system_type: config.system_type.clone(),
                addr_ton: 0,
                addr_npi: 0,
                address_range: String::new(),
            }),
        ))
        .await?;

    let reply = timeout(config.bind_timeout, framed.next())
        .await
        .map_err(|_| SessionError::Timeout("bind_transceiver_resp"))?
        .ok_or(SessionError::ConnectionLost)??;

    match reply.pdu {
        Pdu::BindTransceiverResp { system_id } if reply.command_status.is_ok() => {
            info!(smsc_system_id = %system_id, "bound as transceiver");
        }
        Pdu::BindTransceiverResp { .. } | Pdu::GenericNack => {
            return Err(SessionError::BindRejected(reply.command_status));
        }
        other => return Err(SessionError::UnexpectedPdu(other.name())),
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_CAPACITY);

    let driver = SessionDriver {
        framed,
        outbound: outbound_rx,
        notifications: notify_tx,
        enquire_link_interval: config.enquire_link_interval,
        sequence: MAX_SEQUENCE,
    };

    Ok((
        SessionHandle {
            outbound: outbound_tx,
        },
        notify_rx,
        driver,
    ))
}

impl<T> SessionDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Pump the connection until cancelled (clean unbind, `Ok`) or the link
    /// fails (`Err`)
    pub async fn run(mut self, ctx: CancellationToken) -> Result<(), SessionError> {
        let period = self.enquire_link_interval.max(MIN_ENQUIRE_LINK_INTERVAL);
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = ctx.cancelled() => {
                    return self.unbind().await;
                }

                Some(out) = self.outbound.recv() => {
                    let result = self.framed.send(out.frame).await;
                    let _ = out
                        .written
                        .send(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
                    result?;
                }

                inbound = self.framed.next() => {
                    let frame = inbound.ok_or(SessionError::ConnectionLost)??;
                    self.handle_inbound(frame).await?;
                }

                _ = keepalive.tick() => {
                    let seq = self.next_sequence();
                    debug!(sequence_number = seq, "sending enquire_link");
                    self.framed.send(Frame::new(seq, Pdu::EnquireLink)).await?;
                }
            }
        }
    }

    async fn handle_inbound(&mut self, frame: Frame) -> Result<(), SessionError> {
        let seq = frame.sequence_number;
        let status = frame.command_status;

        match frame.pdu {
            Pdu::SubmitSmResp { message_id } => {
                debug!(sequence_number = seq, command_status = %status, message_id = %message_id, "submit_sm_resp received");
                self.notify(Notification::SubmitAck {
                    sequence_number: seq,
                    command_status: status,
                    message_id,
                })
                .await;
            }
            Pdu::DeliverSm(message) => {
                self.framed
                    .send(Frame::new(seq, Pdu::DeliverSmResp))
                    .await?;
                self.notify(Notification::Delivery {
                    sequence_number: seq,
                    command_status: status,
                    message,
                })
                .await;
            }
            Pdu::EnquireLink => {
                self.framed
                    .send(Frame::new(seq, Pdu::EnquireLinkResp))
                    .await?;
            }
            Pdu::EnquireLinkResp => debug!(sequence_number = seq, "enquire_link_resp received"),
            Pdu::GenericNack => {
                warn!(sequence_number = seq, command_status = %status, "generic_nack received")
            }
            Pdu::DataSm { body } => {
                info!(sequence_number = seq, body_len = body.len(), "data_sm received")
            }
            Pdu::Invalid { command_id, reason } => {
                warn!(command_id, sequence_number = seq, reason = %reason, "undecodable PDU body");
                if command_id == DELIVER_SM {
                    // Permanent error so the SMSC does not redeliver the same bytes
                    self.framed
                        .send(Frame::new(seq, Pdu::DeliverSmResp).with_status(CommandStatus::ESME_RX_P_APPN))
                        .await?;
                } else if command_id & 0x8000_0000 == 0 {
                    self.framed
                        .send(Frame::new(seq, Pdu::GenericNack).with_status(CommandStatus::ESME_RSYSERR))
                        .await?;
                }
            }
            Pdu::Unbind => {
                info!("operator requested unbind");
                self.framed.send(Frame::new(seq, Pdu::UnbindResp)).await?;
                return Err(SessionError::Unbound);
            }
            other if other.command_id() & 0x8000_0000 == 0 => {
                warn!(command_id = other.command_id(), "unsupported request, replying generic_nack");
                self.framed
                    .send(Frame::new(seq, Pdu::GenericNack).with_status(CommandStatus::ESME_RINVCMDID))
                    .await?;
            }
            other => debug!(pdu = other.name(), sequence_number = seq, "ignoring response"),
        }
        Ok(())
    }

    async fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).await.is_err() {
            warn!("notification receiver dropped, discarding operator event");
        }
    }

    async fn unbind(&mut self) -> Result<(), SessionError> {
        info!("unbinding from SMSC");
        let seq = self.next_sequence();
        self.framed.send(Frame::new(seq, Pdu::Unbind)).await?;

        match timeout(UNBIND_GRACE, self.await_unbind_resp()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("no unbind_resp from SMSC, closing anyway");
                Ok(())
            }
        }
    }

    async fn await_unbind_resp(&mut self) -> Result<(), SessionError> {
        while let Some(frame) = self.framed.next().await {
            if matches!(frame?.pdu, Pdu::UnbindResp) {
                return Ok(());
            }
        }
        Ok(())
    }

    fn next_sequence(&mut self) -> u32 {
        let seq = self.sequence;
        self.sequence = if seq <= DRIVER_SEQUENCE_FLOOR {
            MAX_SEQUENCE
        } else {
            seq - 1
        };
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{Address, UNBIND};
    use bytes::{BufMut, Bytes, BytesMut};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn config() -> SessionConfig {
        SessionConfig {
            address: "in-memory".to_string(),
            system_id: "esme".to_string(),
            password: "secret".to_string(),
            system_type: String::new(),
            bind_timeout: Duration::from_secs(1),
            enquire_link_interval: Duration::from_secs(60),
        }
    }

    /// Accept the bind on the SMSC side of the pipe
    async fn accept_bind(smsc: &mut Framed<DuplexStream, SmppCodec>, status: CommandStatus) {
        let bind = smsc.next().await.unwrap().unwrap();
        assert!(matches!(bind.pdu, Pdu::BindTransceiver(ref b) if b.system_id == "esme"));
        smsc.send(
            Frame::new(
                bind.sequence_number,
                Pdu::BindTransceiverResp {
                    system_id: "smsc".to_string(),
                },
            )
            .with_status(status),
        )
        .await
        .unwrap();
    }

    async fn bound_session() -> (
        Session<DuplexStream>,
        Framed<DuplexStream, SmppCodec>,
    ) {
        let (esme_io, smsc_io) = tokio::io::duplex(4096);
        let mut smsc = Framed::new(smsc_io, SmppCodec);

        let cfg = config();
        let (session, ()) = tokio::join!(
            async { bind(esme_io, &cfg).await.unwrap() },
            accept_bind(&mut smsc, CommandStatus::ESME_ROK)
        );
        (session, smsc)
    }

    #[tokio::test]
    async fn test_bind_rejected() {
        let (esme_io, smsc_io) = tokio::io::duplex(4096);
        let mut smsc = Framed::new(smsc_io, SmppCodec);

        let cfg = config();
        let (result, ()) = tokio::join!(
            bind(esme_io, &cfg),
            accept_bind(&mut smsc, CommandStatus::ESME_RINVPASWD)
        );

        assert!(matches!(
            result,
            Err(SessionError::BindRejected(CommandStatus::ESME_RINVPASWD))
        ));
    }

    #[tokio::test]
    async fn test_submit_is_written_with_request_sequence_number() {
        let ((handle, _notifications, driver), mut smsc) = bound_session().await;
        let ctx = CancellationToken::new();
        let task = tokio::spawn(driver.run(ctx.clone()));

        let message = ShortMessage {
            source: Address::sender("ACME").unwrap(),
            destination: Address::recipient("998901234567").unwrap(),
            short_message: Bytes::from_static(b"hi"),
            ..Default::default()
        };
        handle.submit(4242, message.clone()).await.unwrap();

        let frame = smsc.next().await.unwrap().unwrap();
        assert_eq!(frame.sequence_number, 4242);
        assert_eq!(frame.pdu, Pdu::SubmitSm(message));

        ctx.cancel();
        let unbind = smsc.next().await.unwrap().unwrap();
        assert_eq!(unbind.pdu.command_id(), UNBIND);
        smsc.send(Frame::new(unbind.sequence_number, Pdu::UnbindResp))
            .await
            .unwrap();

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_deliver_sm_is_acknowledged_and_forwarded() {
        let ((_handle, mut notifications, driver), mut smsc) = bound_session().await;
        let ctx = CancellationToken::new();
        let _task = tokio::spawn(driver.run(ctx.clone()));

        let receipt = ShortMessage {
            esm_class: 0x04,
            short_message: Bytes::from_static(b"id:12 stat:DELIVRD"),
            ..Default::default()
        };
        smsc.send(Frame::new(77, Pdu::DeliverSm(receipt.clone())))
            .await
            .unwrap();

        let resp = smsc.next().await.unwrap().unwrap();
        assert_eq!(resp.sequence_number, 77);
        assert_eq!(resp.pdu, Pdu::DeliverSmResp);

        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::Delivery {
                sequence_number: 77,
                command_status: CommandStatus::ESME_ROK,
                message: receipt,
            }
        );
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_submit_sm_resp_becomes_submit_ack() {
        let ((_handle, mut notifications, driver), mut smsc) = bound_session().await;
        let ctx = CancellationToken::new();
        let _task = tokio::spawn(driver.run(ctx.clone()));

        smsc.send(
            Frame::new(
                5,
                Pdu::SubmitSmResp {
                    message_id: String::new(),
                },
            )
            .with_status(CommandStatus::ESME_RTHROTTLED),
        )
        .await
        .unwrap();

        assert_eq!(
            notifications.recv().await.unwrap(),
            Notification::SubmitAck {
                sequence_number: 5,
                command_status: CommandStatus::ESME_RTHROTTLED,
                message_id: String::new(),
            }
        );
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_enquire_link_is_answered() {
        let ((_handle, _notifications, driver), mut smsc) = bound_session().await;
        let ctx = CancellationToken::new();
        let _task = tokio::spawn(driver.run(ctx.clone()));

        smsc.send(Frame::new(9, Pdu::EnquireLink)).await.unwrap();
        let resp = smsc.next().await.unwrap().unwrap();

        assert_eq!(resp.sequence_number, 9);
        assert_eq!(resp.pdu, Pdu::EnquireLinkResp);
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_connection_loss_ends_session_with_error() {
        let ((handle, _notifications, driver), smsc) = bound_session().await;
        let task = tokio::spawn(driver.run(CancellationToken::new()));

        drop(smsc);

        assert!(matches!(
            task.await.unwrap(),
            Err(SessionError::ConnectionLost) | Err(SessionError::Pdu(_))
        ));
        let result = handle.submit(1, ShortMessage::default()).await;
        assert!(matches!(result, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn test_operator_unbind_is_answered_and_ends_session() {
        let ((_handle, _notifications, driver), mut smsc) = bound_session().await;
        let task = tokio::spawn(driver.run(CancellationToken::new()));

        smsc.send(Frame::new(11, Pdu::Unbind)).await.unwrap();
        let resp = smsc.next().await.unwrap().unwrap();

        assert_eq!(resp.pdu, Pdu::UnbindResp);
        assert!(matches!(task.await.unwrap(), Err(SessionError::Unbound)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_sends_enquire_link() {
        let ((_handle, _notifications, driver), mut smsc) = bound_session().await;
        let ctx = CancellationToken::new();
        let _task = tokio::spawn(driver.run(ctx.clone()));

        tokio::time::advance(Duration::from_secs(61)).await;
        let frame = smsc.next().await.unwrap().unwrap();

        assert_eq!(frame.pdu, Pdu::EnquireLink);
        assert_eq!(frame.sequence_number, MAX_SEQUENCE);
        ctx.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_keepalive_interval_does_not_panic() {
        let (esme_io, smsc_io) = tokio::io::duplex(4096);
        let mut smsc = Framed::new(smsc_io, SmppCodec);
        let cfg = SessionConfig {
            enquire_link_interval: Duration::ZERO,
            ..config()
        };
        let ((_handle, _notifications, driver), ()) = tokio::join!(
            async { bind(esme_io, &cfg).await.unwrap() },
            accept_bind(&mut smsc, CommandStatus::ESME_ROK)
        );
        let ctx = CancellationToken::new();
        let task = tokio::spawn(driver.run(ctx.clone()));

        tokio::time::advance(Duration::from_secs(2)).await;
        let frame = smsc.next().await.unwrap().unwrap();
        assert_eq!(frame.pdu, Pdu::EnquireLink);
        assert!(!task.is_finished());
        ctx.cancel();
    }

    #[test]
    fn test_driver_sequence_counts_down_and_wraps_within_its_window() {
        let (esme_io, _smsc_io) = tokio::io::duplex(64);
        let (outbound, outbound_rx) = mpsc::channel(1);
        let (notifications, _notify_rx) = mpsc::channel(1);
        drop(outbound);
        let mut driver = SessionDriver {
            framed: Framed::new(esme_io, SmppCodec),
            outbound: outbound_rx,
            notifications,
            enquire_link_interval: Duration::from_secs(60),
            sequence: MAX_SEQUENCE,
        };

        assert_eq!(driver.next_sequence(), MAX_SEQUENCE);
        assert_eq!(driver.next_sequence(), MAX_SEQUENCE - 1);

        driver.sequence = DRIVER_SEQUENCE_FLOOR;
        assert_eq!(driver.next_sequence(), DRIVER_SEQUENCE_FLOOR);
        assert_eq!(driver.next_sequence(), MAX_SEQUENCE);
    }

    /// deliver_sm with a non-ASCII byte in source_addr
    fn undecodable_deliver_sm(sequence_number: u32) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u8(0); // service_type
        body.put_slice(&[0, 0]); // source ton/npi
        body.put_slice(b"Caf\xE9\0");
        body.put_slice(&[0, 0, 0]); // destination ton/npi/addr
        body.put_slice(&[0, 0, 0]); // esm_class, protocol_id, priority_flag
        body.put_u8(0); // schedule_delivery_time
        body.put_u8(0); // validity_period
        body.put_slice(&[0, 0, 0, 0]); // registered_delivery .. sm_default_msg_id
        body.put_u8(0); // sm_length

        let mut raw = BytesMut::new();
        raw.put_u32((16 + body.len()) as u32);
        raw.put_u32(DELIVER_SM);
        raw.put_u32(0);
        raw.put_u32(sequence_number);
        raw.put_slice(&body);
        raw
    }

    #[tokio::test]
    async fn test_undecodable_deliver_sm_is_rejected_and_session_survives() {
        let ((_handle, mut notifications, driver), mut smsc) = bound_session().await;
        let ctx = CancellationToken::new();
        let task = tokio::spawn(driver.run(ctx.clone()));

        smsc.get_mut()
            .write_all(&undecodable_deliver_sm(77))
            .await
            .unwrap();

        let resp = smsc.next().await.unwrap().unwrap();
        assert_eq!(resp.sequence_number, 77);
        assert_eq!(resp.pdu, Pdu::DeliverSmResp);
        assert_eq!(resp.command_status, CommandStatus::ESME_RX_P_APPN);
        assert!(notifications.try_recv().is_err());

        smsc.send(Frame::new(78, Pdu::EnquireLink)).await.unwrap();
        let resp = smsc.next().await.unwrap().unwrap();
        assert_eq!(resp.sequence_number, 78);
        assert_eq!(resp.pdu, Pdu::EnquireLinkResp);
        assert!(!task.is_finished());
        ctx.cancel();
    }
}
