//! The controller thread (§4.8, §5): owns the transport, the frame
//! scanner, and the startup adapter probe, and bridges decoded packets to
//! the gateway across an MPSC transmit queue and a bounded receive queue.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use num_enum::TryFromPrimitive;

use crate::config::{ControllerConfig, TransportKind};
use crate::constants::CommandCode;
use crate::error::ControllerError;
use crate::frame::{Frame, FrameScanner};
use crate::packet::{
    ute_request_type, ute_response_code, Address, CommonCommandRequest, IdBaseResponse, Packet, Response,
    UteTeachIn, Version, BROADCAST,
};

/// A byte transport the controller drives: either a serial port or a
/// listening TCP socket (§4.8 "Transport"). `read` is non-blocking in
/// spirit - it returns `Ok(0)` rather than blocking indefinitely, so the
/// worker loop keeps observing the stop flag and draining the transmit
/// queue between reads.
pub trait Transport: Send {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;
}

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baudrate: u32) -> std::io::Result<Self> {
        let port = serialport::new(path, baudrate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        Write::write_all(&mut self.port, buf)
    }
}

/// One client at a time, matching the Python original's TCP controller:
/// a second connection attempt simply waits until the first disconnects.
pub struct TcpTransport {
    listener: TcpListener,
    client: Option<TcpStream>,
}

impl TcpTransport {
    pub fn bind(host: &str, port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, client: None })
    }

    fn accept_if_needed(&mut self) {
        if self.client.is_none() {
            if let Ok((stream, _)) = self.listener.accept() {
                let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
                let _ = stream.set_nodelay(true);
                self.client = Some(stream);
            }
        }
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.accept_if_needed();
        match &mut self.client {
            None => {
                std::thread::sleep(Duration::from_millis(100));
                Ok(0)
            }
            Some(stream) => match stream.read(buf) {
                Ok(0) => {
                    self.client = None;
                    Ok(0)
                }
                Ok(n) => Ok(n),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    Ok(0)
                }
                Err(e) => {
                    self.client = None;
                    Err(e)
                }
            },
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        if let Some(stream) = &mut self.client {
            stream.write_all(buf)?;
        }
        Ok(())
    }
}

fn open_transport(config: &ControllerConfig) -> std::io::Result<Box<dyn Transport>> {
    match config.transport {
        TransportKind::Serial => {
            let path = config
                .port
                .as_deref()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "controller.port is required for a serial transport"))?;
            Ok(Box::new(SerialTransport::open(path, config.baudrate)?))
        }
        TransportKind::Tcp => {
            let host = config.host.as_deref().unwrap_or("0.0.0.0");
            Ok(Box::new(TcpTransport::bind(host, config.tcp_port)?))
        }
    }
}

/// What the startup probe (§4.8) has learned about the attached module.
/// `own_address` mirrors the Python original's `address` property: prefer
/// the chip ID, fall back to the configured base ID.
#[derive(Debug, Clone, Default)]
pub struct AdapterInfo {
    pub app_version: Option<Version>,
    pub api_version: Option<Version>,
    pub chip_id: Option<Address>,
    pub base_id: Option<Address>,
    pub description: Option<String>,
    pub frequency: Option<Vec<u8>>,
    pub noise_threshold: Option<Vec<u8>>,
    pub repeater: Option<Vec<u8>>,
}

impl AdapterInfo {
    pub fn own_address(&self) -> Option<Address> {
        self.chip_id.or(self.base_id)
    }
}

/// Handle to a running controller thread. Owns the transmit side of the
/// command queue and the consumer side of the receive queue; dropping it
/// signals the worker to stop and joins it.
pub struct ControllerHandle {
    transmit: Sender<Frame>,
    receive: Receiver<Packet>,
    pub adapter_info: Arc<RwLock<AdapterInfo>>,
    crc_errors: Arc<AtomicU64>,
    teach_in_enabled: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn spawn(config: &ControllerConfig) -> Result<Self, ControllerError> {
        let transport = open_transport(config)?;

        let (transmit_tx, transmit_rx) = mpsc::channel::<Frame>();
        let (receive_tx, receive_rx) = mpsc::sync_channel::<Packet>(64);
        let adapter_info = Arc::new(RwLock::new(AdapterInfo::default()));
        let crc_errors = Arc::new(AtomicU64::new(0));
        let teach_in_enabled = Arc::new(AtomicBool::new(config.teach_in));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = ControllerWorker {
            transport,
            transmit_rx,
            receive_tx,
            adapter_info: adapter_info.clone(),
            crc_errors: crc_errors.clone(),
            stop: stop.clone(),
            scanner: FrameScanner::new(),
            command_queue: VecDeque::new(),
            teach_in_enabled: teach_in_enabled.clone(),
        };

        let join = std::thread::Builder::new()
            .name("enocean-controller".into())
            .spawn(move || worker.run())
            .map_err(|e| ControllerError::TransportFailure(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok(Self { transmit: transmit_tx, receive: receive_rx, adapter_info, crc_errors, teach_in_enabled, stop, join: Some(join) })
    }

    /// Toggles teach-in acceptance at runtime (§6.4 `learn` topic).
    pub fn set_teach_in(&self, enabled: bool) {
        self.teach_in_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn teach_in_enabled(&self) -> bool {
        self.teach_in_enabled.load(Ordering::Relaxed)
    }

    /// Enqueues a frame for transmission; never blocks.
    pub fn send(&self, frame: Frame) {
        if self.transmit.send(frame).is_err() {
            log::error!("controller: transmit queue is closed, dropping frame");
        }
    }

    /// Blocks for at most `timeout` waiting for the next decoded packet.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Packet> {
        match self.receive.recv_timeout(timeout) {
            Ok(packet) => Some(packet),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn own_address(&self) -> Option<Address> {
        self.adapter_info.read().unwrap().own_address()
    }

    pub fn crc_error_count(&self) -> u64 {
        self.crc_errors.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ControllerWorker {
    transport: Box<dyn Transport>,
    transmit_rx: Receiver<Frame>,
    receive_tx: SyncSender<Packet>,
    adapter_info: Arc<RwLock<AdapterInfo>>,
    crc_errors: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    scanner: FrameScanner,
    /// Command codes sent but not yet answered, in sending order - the
    /// only piece of state needed to correlate a `RESPONSE` packet with
    /// the request that produced it (there is no request ID in ESP3).
    command_queue: VecDeque<u8>,
    teach_in_enabled: Arc<AtomicBool>,
}

impl ControllerWorker {
    fn run(mut self) {
        self.enqueue_startup_probe();

        let mut buf = [0u8; 256];
        while !self.stop.load(Ordering::Relaxed) {
            while let Ok(frame) = self.transmit_rx.try_recv() {
                if let Err(e) = self.transport.write_all(&frame.to_bytes()) {
                    log::warn!("controller: write failed: {e}");
                }
            }

            match self.transport.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => self.scanner.feed(&buf[..n]),
                Err(e) => {
                    log::warn!("controller: read failed: {e}");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }

            loop {
                match self.scanner.try_parse() {
                    Ok(Some(frame)) => self.dispatch(frame),
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("controller: frame decode failed: {e}");
                        break;
                    }
                }
            }
            self.crc_errors.store(self.scanner.crc_errors(), Ordering::Relaxed);
        }
    }

    /// Probes the attached module in the order spec'd (version, frequency,
    /// id base, noise threshold, repeater state), queuing the codes so the
    /// matching responses populate `AdapterInfo` as they arrive.
    fn enqueue_startup_probe(&mut self) {
        let requests = [
            CommonCommandRequest::read_version(),
            CommonCommandRequest::get_frequency_info(),
            CommonCommandRequest::read_id_base(),
            CommonCommandRequest::get_noise_threshold(),
            CommonCommandRequest::read_repeater(),
        ];
        for request in requests {
            self.command_queue.push_back(request.code);
            if let Err(e) = self.transport.write_all(&request.to_frame().to_bytes()) {
                log::warn!("controller: startup probe write failed: {e}");
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        let packet = match Packet::decode(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("controller: packet decode failed: {e}");
                return;
            }
        };

        match packet {
            Packet::Response(ref response) if !self.command_queue.is_empty() => {
                let code = self.command_queue.pop_front().unwrap();
                self.handle_command_response(code, response);
            }
            Packet::UteTeachIn(ute) => {
                self.handle_ute_teach_in(ute);
                if self.receive_tx.try_send(Packet::UteTeachIn(ute)).is_err() {
                    log::warn!("controller: receive queue full, dropping UTE teach-in");
                }
            }
            other => {
                if self.receive_tx.try_send(other).is_err() {
                    log::warn!("controller: receive queue full, dropping packet");
                }
            }
        }
    }

    fn handle_command_response(&mut self, code: u8, response: &Response) {
        if response.return_code_enum().ok() != Some(crate::constants::ReturnCode::Ok) {
            log::warn!("controller: command {code:#04x} returned {:#04x}", response.return_code);
            return;
        }
        let mut info = self.adapter_info.write().unwrap();
        match CommandCode::try_from_primitive(code) {
            Ok(CommandCode::CoRdVersion) => match crate::packet::VersionResponse::decode(response) {
                Ok(version) => {
                    info.app_version = Some(version.app);
                    info.api_version = Some(version.api);
                    info.chip_id = Some(version.chip_id);
                    info.description = Some(version.description);
                }
                Err(e) => log::warn!("controller: malformed version response: {e}"),
            },
            Ok(CommandCode::CoRdIdBase) => match IdBaseResponse::decode(response) {
                Ok(id_base) => info.base_id = Some(id_base.base_id),
                Err(e) => log::warn!("controller: malformed id base response: {e}"),
            },
            Ok(CommandCode::CoGetFrequencyInfo) => info.frequency = Some(response.data.clone()),
            Ok(CommandCode::CoGetNoiseThreshold) => info.noise_threshold = Some(response.data.clone()),
            Ok(CommandCode::CoRdRepeater) => info.repeater = Some(response.data.clone()),
            _ => {}
        }
    }

    /// Answers a UTE teach-in request immediately so the sending device's
    /// own handshake timeout doesn't expire (§4.6); acceptance policy
    /// (which profiles/equipment are allowed to register) lives in the
    /// gateway and is applied only to what ends up in the equipment table.
    fn handle_ute_teach_in(&mut self, ute: UteTeachIn) {
        let own = match self.adapter_info.read().unwrap().own_address() {
            Some(address) => address,
            None => return,
        };
        if ute.destination == Some(own) || !ute.response_expected {
            return;
        }
        if !self.teach_in_enabled.load(Ordering::Relaxed) {
            return;
        }

        let destination = ute.destination.unwrap_or(BROADCAST);
        let response_code = if ute.request_type == ute_request_type::DELETION {
            ute_response_code::ACCEPTED_DELETION
        } else {
            ute_response_code::ACCEPTED_REGISTRATION
        };

        let response = ute.build_response(response_code, own, destination);
        let frame = Packet::RadioErp1(response).to_frame();
        if let Err(e) = self.transport.write_all(&frame.to_bytes()) {
            log::warn!("controller: UTE response write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory transport for exercising the worker's dispatch logic
    /// without a real serial port.
    struct LoopbackTransport {
        inbound: VecDeque<u8>,
        outbound: Arc<Mutex<Vec<u8>>>,
    }

    impl Transport for LoopbackTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inbound.len().min(buf.len());
            for (i, b) in self.inbound.drain(..n).enumerate() {
                buf[i] = b;
            }
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
            self.outbound.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }
    }

    fn worker_with(inbound: Vec<u8>) -> (ControllerWorker, Arc<Mutex<Vec<u8>>>, SyncSender<Packet>, Receiver<Packet>) {
        let outbound = Arc::new(Mutex::new(Vec::new()));
        let (_transmit_tx, transmit_rx) = mpsc::channel();
        let (receive_tx, receive_rx) = mpsc::sync_channel(8);
        let worker = ControllerWorker {
            transport: Box::new(LoopbackTransport { inbound: inbound.into(), outbound: outbound.clone() }),
            transmit_rx,
            receive_tx: receive_tx.clone(),
            adapter_info: Arc::new(RwLock::new(AdapterInfo::default())),
            crc_errors: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            scanner: FrameScanner::new(),
            command_queue: VecDeque::new(),
            teach_in_enabled: Arc::new(AtomicBool::new(true)),
        };
        (worker, outbound, receive_tx, receive_rx)
    }

    #[test]
    fn response_matching_an_outstanding_command_populates_adapter_info() {
        let (mut worker, _out, _tx, rx) = worker_with(vec![]);
        worker.command_queue.push_back(CommandCode::CoRdIdBase as u8);

        let response = Response { return_code: 0, data: vec![0x05, 0x11, 0x72, 0xF7], optional: vec![] };
        let frame = response.to_frame_for_test();
        worker.dispatch(frame);

        assert_eq!(worker.adapter_info.read().unwrap().base_id, Some(Address([0x05, 0x11, 0x72, 0xF7])));
        assert!(rx.try_recv().is_err(), "intercepted response must not reach the consumer");
    }

    #[test]
    fn response_with_no_outstanding_command_is_forwarded() {
        let (mut worker, _out, _tx, rx) = worker_with(vec![]);
        let response = Response { return_code: 0, data: vec![], optional: vec![] };
        worker.dispatch(response.to_frame_for_test());
        assert!(matches!(rx.try_recv().unwrap(), Packet::Response(_)));
    }

    #[test]
    fn ute_teach_in_gets_an_accepted_response_and_is_forwarded() {
        let (mut worker, out, _tx, rx) = worker_with(vec![]);
        worker.adapter_info.write().unwrap().chip_id = Some(Address([0xDE, 0xAD, 0xBE, 0xEF]));

        let radio = crate::packet::RadioErp1 {
            rorg: 0xD4,
            payload: vec![0xA0, 0xFF, 0x01, 0x16, 0x05, 0x02, 0xA5],
            sender: Address([0x11, 0x22, 0x33, 0x44]),
            status: 0,
            subtel_num: None,
            destination: None,
            dbm: None,
            security_level: None,
        };
        let ute = UteTeachIn::from_radio_erp1(&radio).unwrap();
        worker.dispatch_test_ute(ute);

        assert!(!out.lock().unwrap().is_empty(), "expected a UTE response to be written");
        assert!(matches!(rx.try_recv().unwrap(), Packet::UteTeachIn(_)));
    }

    #[test]
    fn ute_echo_back_to_our_own_address_is_not_answered() {
        let (mut worker, out, _tx, _rx) = worker_with(vec![]);
        worker.adapter_info.write().unwrap().chip_id = Some(Address([0x11, 0x22, 0x33, 0x44]));

        let radio = crate::packet::RadioErp1 {
            rorg: 0xD4,
            payload: vec![0xA0, 0xFF, 0x01, 0x16, 0x05, 0x02, 0xA5],
            sender: Address([0x99, 0x88, 0x77, 0x66]),
            status: 0,
            subtel_num: None,
            destination: Some(Address([0x11, 0x22, 0x33, 0x44])),
            dbm: None,
            security_level: None,
        };
        let ute = UteTeachIn::from_radio_erp1(&radio).unwrap();
        worker.handle_ute_teach_in(ute);
        assert!(out.lock().unwrap().is_empty());
    }

    #[test]
    fn ute_teach_in_is_ignored_when_teach_in_disabled() {
        let (mut worker, out, _tx, _rx) = worker_with(vec![]);
        worker.adapter_info.write().unwrap().chip_id = Some(Address([0xDE, 0xAD, 0xBE, 0xEF]));
        worker.teach_in_enabled.store(false, Ordering::Relaxed);

        let radio = crate::packet::RadioErp1 {
            rorg: 0xD4,
            payload: vec![0xA0, 0xFF, 0x01, 0x16, 0x05, 0x02, 0xA5],
            sender: Address([0x11, 0x22, 0x33, 0x44]),
            status: 0,
            subtel_num: None,
            destination: None,
            dbm: None,
            security_level: None,
        };
        let ute = UteTeachIn::from_radio_erp1(&radio).unwrap();
        worker.handle_ute_teach_in(ute);
        assert!(out.lock().unwrap().is_empty(), "disabled teach-in must not transmit a refusal");
    }

    impl ControllerWorker {
        fn dispatch_test_ute(&mut self, ute: UteTeachIn) {
            self.handle_ute_teach_in(ute);
            let _ = self.receive_tx.try_send(Packet::UteTeachIn(ute));
        }
    }

    impl Response {
        fn to_frame_for_test(&self) -> Frame {
            let mut data = vec![self.return_code];
            data.extend_from_slice(&self.data);
            Frame::new(crate::constants::PacketType::Response as u8, data, self.optional.clone())
        }
    }
}
