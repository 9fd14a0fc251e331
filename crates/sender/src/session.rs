//! Gerenciador da sessão serial – único escritor do dispositivo.
//!
//! Máquina de estados:
//!
//! ```text
//! Disconnected ──► Connecting ──(abriu)──► Ready ──(falha de escrita)──┐
//!      ▲               │                     │                         │
//!      └──(backoff)────┘ (falha ao abrir)    └─(fila fechada)─► Failed │
//!      └───────────────────────(backoff)───────────────────────────────┘
//! ```
//!
//! A fila fechada também leva a `Failed` a partir de `Disconnected`: sem
//! produtores vivos e sem pacotes pendentes não há por que reconectar.
//!
//! Ao entrar em `Ready` o pacote de reset é escrito antes de qualquer dado.
//! A entrega é no máximo uma vez: o pacote cuja escrita falhou é perdido e a
//! fila continua do próximo após a reconexão.

use crate::queue::{Dequeued, PacketReceiver};
use crate::shutdown::Shutdown;
use crate::transport::{Connector, TransportError};
use std::io::{self, Write};
use std::time::Duration;
use telemetry_core::{Packet, encode_reset};
use tracing::{debug, error, info, trace, warn};

/// Estado da conexão, exclusivo da sessão.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    /// Terminal: erro que não é de transporte
    Failed(String),
}

/// Erros que encerram a sessão. Falhas de transporte nunca chegam aqui.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Todas as fontes de pacotes encerraram; nada mais a enviar")]
    QueueClosed,
}

/// Backoff exponencial limitado entre tentativas de conexão.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Próxima espera; dobra até o teto.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Contadores da sessão.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub connect_attempts: u64,
    /// Conexões que chegaram a `Ready`
    pub sessions: u64,
    /// Pacotes de dados confirmados (sem contar resets)
    pub packets_sent: u64,
    pub write_failures: u64,
    pub retry_waits: u64,
}

enum SessionEnd {
    Shutdown,
    QueueClosed,
    WriteFailed(io::Error),
}

pub struct SessionManager<C: Connector> {
    connector: C,
    queue: PacketReceiver,
    shutdown: Shutdown,
    backoff: Backoff,
    state: ConnectionState,
    stats: SessionStats,
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C, queue: PacketReceiver, shutdown: Shutdown, backoff: Backoff) -> Self {
        Self {
            connector,
            queue,
            shutdown,
            backoff,
            state: ConnectionState::Disconnected,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Roda até o encerramento (`Ok`) ou até um erro terminal (`Err`).
    pub fn run(&mut self) -> Result<(), SessionError> {
        info!("Sessão serial iniciada para {}", self.connector.target());

        loop {
            if self.shutdown.is_triggered() {
                self.transition(ConnectionState::Disconnected);
                return Ok(());
            }
            if self.queue.is_closed() {
                return Err(self.fail(SessionError::QueueClosed));
            }

            self.transition(ConnectionState::Connecting);
            self.stats.connect_attempts += 1;
            let mut link = match self.connector.connect() {
                Ok(link) => link,
                Err(source) => {
                    let err = TransportError::Open {
                        device: self.connector.target().to_string(),
                        source,
                    };
                    warn!("{err}");
                    self.transition(ConnectionState::Disconnected);
                    if self.wait_retry() {
                        return Ok(());
                    }
                    continue;
                }
            };

            self.backoff.reset();
            self.stats.sessions += 1;
            self.transition(ConnectionState::Ready);
            info!("Conectado a {}", self.connector.target());

            let end = self.serve(&mut link);
            drop(link);
            debug!("Dispositivo {} fechado", self.connector.target());

            match end {
                SessionEnd::Shutdown => {
                    self.transition(ConnectionState::Disconnected);
                    info!(
                        "Sessão serial encerrada ({} pacotes enviados)",
                        self.stats.packets_sent
                    );
                    return Ok(());
                }
                SessionEnd::QueueClosed => return Err(self.fail(SessionError::QueueClosed)),
                SessionEnd::WriteFailed(source) => {
                    self.stats.write_failures += 1;
                    let err = TransportError::Write {
                        device: self.connector.target().to_string(),
                        source,
                    };
                    warn!("{err}");
                    self.transition(ConnectionState::Disconnected);
                    if self.wait_retry() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Loop interno de `Ready`: reset, depois drena a fila.
    fn serve(&mut self, link: &mut C::Link) -> SessionEnd {
        if let Err(e) = write_packet(link, &encode_reset()) {
            return SessionEnd::WriteFailed(e);
        }
        trace!("Reset enviado");

        loop {
            match self.queue.dequeue(&self.shutdown) {
                Dequeued::Packet(packet) => {
                    trace!("→ {:?} {:02X?}", packet.kind(), packet.as_bytes());
                    if let Err(e) = write_packet(link, &packet) {
                        debug!("Pacote {:?} descartado após falha de escrita", packet.kind());
                        return SessionEnd::WriteFailed(e);
                    }
                    self.stats.packets_sent += 1;
                }
                Dequeued::Shutdown => return SessionEnd::Shutdown,
                Dequeued::Closed => return SessionEnd::QueueClosed,
            }
        }
    }

    /// Espera o backoff. Retorna `true` se o encerramento chegou antes.
    fn wait_retry(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        self.stats.retry_waits += 1;
        warn!(
            "Nova tentativa em {:.1}s ({} na fila, {} descartados)",
            delay.as_secs_f64(),
            self.queue.len(),
            self.queue.dropped()
        );
        self.shutdown.wait_timeout(delay)
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        error!("{err}");
        self.transition(ConnectionState::Failed(err.to_string()));
        err
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("Sessão: {:?} → {:?}", self.state, next);
            self.state = next;
        }
    }
}

fn write_packet<W: Write>(link: &mut W, packet: &Packet) -> io::Result<()> {
    link.write_all(packet.as_bytes())?;
    link.flush()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{PacketSender, packet_queue};
    use crate::shutdown::shutdown_channel;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;
    use telemetry_core::protocol::FrameDecoder;
    use telemetry_core::{PacketKind, encode_cpu_bars, encode_net_bars};

    /// Estado observável do display simulado.
    #[derive(Default)]
    struct DeviceLog {
        open_failures: usize,
        /// Escritas aceitas por conexão (None = ilimitado)
        write_budgets: VecDeque<Option<usize>>,
        sessions: Vec<Vec<u8>>,
        opened: usize,
        closed: usize,
    }

    #[derive(Clone, Default)]
    struct MockConnector {
        log: Arc<Mutex<DeviceLog>>,
    }

    struct MockLink {
        log: Arc<Mutex<DeviceLog>>,
        session: usize,
        budget: Option<usize>,
    }

    impl MockConnector {
        fn new(open_failures: usize, write_budgets: &[Option<usize>]) -> Self {
            let log = DeviceLog {
                open_failures,
                write_budgets: write_budgets.iter().copied().collect(),
                ..Default::default()
            };
            Self {
                log: Arc::new(Mutex::new(log)),
            }
        }

        fn frames(&self, session: usize) -> Vec<Packet> {
            let log = self.log.lock().unwrap();
            FrameDecoder::default().feed(&log.sessions[session])
        }
    }

    impl Connector for MockConnector {
        type Link = MockLink;

        fn target(&self) -> &str {
            "/dev/mock"
        }

        fn connect(&mut self) -> io::Result<MockLink> {
            let mut log = self.log.lock().unwrap();
            if log.open_failures > 0 {
                log.open_failures -= 1;
                return Err(io::Error::new(io::ErrorKind::NotFound, "device busy"));
            }
            log.opened += 1;
            log.sessions.push(Vec::new());
            Ok(MockLink {
                log: self.log.clone(),
                session: log.sessions.len() - 1,
                budget: log.write_budgets.pop_front().flatten(),
            })
        }
    }

    impl Write for MockLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(budget) = self.budget.as_mut() {
                if *budget == 0 {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged"));
                }
                *budget -= 1;
            }
            self.log.lock().unwrap().sessions[self.session].extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for MockLink {
        fn drop(&mut self) {
            self.log.lock().unwrap().closed += 1;
        }
    }

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(4))
    }

    fn data(n: u64) -> Packet {
        encode_net_bars(n * 1024, 0, 1024)
    }

    fn preload(tx: PacketSender, packets: &[Packet]) {
        for p in packets {
            tx.enqueue(p.clone()).unwrap();
        }
    }

    #[test]
    fn reconnects_after_open_failures_and_sends_reset_first() {
        let connector = MockConnector::new(3, &[None]);
        let (_trigger, shutdown) = shutdown_channel();
        let (tx, rx) = packet_queue(16);
        let packets = [encode_cpu_bars(&[10.0, 50.0, 90.0, 0.0]), data(2)];
        preload(tx, &packets);

        let mut manager = SessionManager::new(connector.clone(), rx, shutdown, fast_backoff());
        assert_eq!(manager.run(), Err(SessionError::QueueClosed));

        assert_eq!(manager.stats().connect_attempts, 4);
        assert_eq!(manager.stats().retry_waits, 3);
        assert_eq!(manager.stats().packets_sent, 2);
        assert!(matches!(manager.state(), ConnectionState::Failed(_)));

        let frames = connector.frames(0);
        assert_eq!(frames[0], encode_reset());
        assert_eq!(&frames[1..], &packets);
        assert_eq!(connector.log.lock().unwrap().sessions[0][..2], [0, 0]);
        assert_eq!(connector.log.lock().unwrap().closed, 1);
    }

    #[test]
    fn write_failure_drops_in_flight_packet() {
        // reset + 2 dados aceitos, a 4ª escrita falha
        let connector = MockConnector::new(0, &[Some(3), None]);
        let (_trigger, shutdown) = shutdown_channel();
        let (tx, rx) = packet_queue(16);
        preload(tx, &[data(1), data(2), data(3), data(4), data(5)]);

        let mut manager = SessionManager::new(connector.clone(), rx, shutdown, fast_backoff());
        assert_eq!(manager.run(), Err(SessionError::QueueClosed));

        assert_eq!(connector.frames(0), vec![encode_reset(), data(1), data(2)]);
        assert_eq!(connector.frames(1), vec![encode_reset(), data(4), data(5)]);

        let stats = manager.stats();
        assert_eq!(stats.connect_attempts, 2);
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.packets_sent, 4);
        assert_eq!(stats.write_failures, 1);
        assert_eq!(connector.log.lock().unwrap().closed, 2);
    }

    #[test]
    fn failed_reset_keeps_queued_packets() {
        let connector = MockConnector::new(0, &[Some(0), None]);
        let (_trigger, shutdown) = shutdown_channel();
        let (tx, rx) = packet_queue(16);
        preload(tx, &[data(1)]);

        let mut manager = SessionManager::new(connector.clone(), rx, shutdown, fast_backoff());
        assert_eq!(manager.run(), Err(SessionError::QueueClosed));

        assert!(connector.frames(0).is_empty());
        assert_eq!(connector.frames(1), vec![encode_reset(), data(1)]);
        assert_eq!(manager.stats().write_failures, 1);
    }

    #[test]
    fn shutdown_while_waiting_on_empty_queue_closes_device() {
        let connector = MockConnector::new(0, &[None]);
        let (trigger, shutdown) = shutdown_channel();
        let (tx, rx) = packet_queue(16);

        let mut manager = SessionManager::new(connector.clone(), rx, shutdown, fast_backoff());
        let handle = std::thread::spawn(move || {
            let result = manager.run();
            (result, manager.state().clone())
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while connector.log.lock().unwrap().sessions.first().map_or(0, Vec::len) < 2 {
            assert!(Instant::now() < deadline, "sessão não conectou");
            std::thread::sleep(Duration::from_millis(5));
        }

        let start = Instant::now();
        trigger.trigger();
        let (result, state) = handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(result, Ok(()));
        assert_eq!(state, ConnectionState::Disconnected);

        let log = connector.log.lock().unwrap();
        assert_eq!(log.opened, 1);
        assert_eq!(log.closed, 1);
        drop(tx);
    }

    #[test]
    fn shutdown_interrupts_backoff() {
        let connector = MockConnector::new(usize::MAX, &[]);
        let (trigger, shutdown) = shutdown_channel();
        let (_tx, rx) = packet_queue(16);
        let backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(30));

        let mut manager = SessionManager::new(connector, rx, shutdown, backoff);
        let handle = std::thread::spawn(move || {
            let result = manager.run();
            (result, manager.stats().clone())
        });

        std::thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        trigger.trigger();
        let (result, stats) = handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(result, Ok(()));
        assert_eq!(stats.connect_attempts, 1);
        assert_eq!(stats.sessions, 0);
    }

    #[test]
    fn closed_queue_fails_while_device_is_absent() {
        let connector = MockConnector::new(usize::MAX, &[]);
        let (_trigger, shutdown) = shutdown_channel();
        let (tx, rx) = packet_queue(16);
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2));

        let mut manager = SessionManager::new(connector, rx, shutdown, backoff);
        let handle = std::thread::spawn(move || {
            let result = manager.run();
            (result, manager.state().clone(), manager.stats().clone())
        });

        std::thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        drop(tx);
        let (result, state, stats) = handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(result, Err(SessionError::QueueClosed));
        assert!(matches!(state, ConnectionState::Failed(_)));
        assert_eq!(stats.sessions, 0);
        assert!(stats.connect_attempts >= 1);
    }

    #[test]
    fn closed_queue_with_pending_packets_still_delivers() {
        let connector = MockConnector::new(2, &[None]);
        let (_trigger, shutdown) = shutdown_channel();
        let (tx, rx) = packet_queue(16);
        preload(tx, &[data(1), data(2)]);

        let mut manager = SessionManager::new(connector.clone(), rx, shutdown, fast_backoff());
        assert_eq!(manager.run(), Err(SessionError::QueueClosed));
        assert_eq!(connector.frames(0), vec![encode_reset(), data(1), data(2)]);
        assert_eq!(manager.stats().connect_attempts, 3);
    }

    #[test]
    fn backoff_doubles_up_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn only_reset_kind_precedes_data() {
        let connector = MockConnector::new(1, &[None]);
        let (_trigger, shutdown) = shutdown_channel();
        let (tx, rx) = packet_queue(16);
        preload(tx, &[encode_cpu_bars(&[100.0])]);

        let mut manager = SessionManager::new(connector.clone(), rx, shutdown, fast_backoff());
        assert_eq!(manager.run(), Err(SessionError::QueueClosed));

        let kinds: Vec<PacketKind> = connector.frames(0).iter().map(Packet::kind).collect();
        assert_eq!(kinds, vec![PacketKind::Reset, PacketKind::CpuBars]);
    }
}
