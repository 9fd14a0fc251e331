//! Fila de pacotes entre os samplers e a sessão serial.
//!
//! FIFO limitada, multi-produtor e consumidor único. Quando a fila enche
//! (desconexão prolongada), o pacote mais antigo é descartado para abrir
//! espaço: `enqueue` nunca bloqueia o ritmo de amostragem.

use crate::shutdown::Shutdown;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use telemetry_core::Packet;

/// O consumidor da fila não existe mais.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Fila de pacotes fechada")]
pub struct QueueClosed;

/// Resultado de um `enqueue` bem-sucedido.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Entrou na fila após descartar o(s) pacote(s) mais antigo(s)
    DroppedOldest,
}

/// Resultado de um `dequeue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    Packet(Packet),
    Shutdown,
    /// Todos os produtores encerraram e a fila está vazia
    Closed,
}

#[derive(Debug, Default)]
struct QueueShared {
    consumer_gone: AtomicBool,
    /// `PacketSender`s vivos; `evict` mantém o canal aberto, então o
    /// fechamento visto pelo consumidor sem bloquear vem daqui.
    producers: AtomicUsize,
    dropped: AtomicU64,
}

/// Lado produtor (clonável, um por sampler).
#[derive(Debug)]
pub struct PacketSender {
    tx: Sender<Packet>,
    evict: Receiver<Packet>,
    shared: Arc<QueueShared>,
}

/// Lado consumidor (único, da sessão serial).
#[derive(Debug)]
pub struct PacketReceiver {
    rx: Receiver<Packet>,
    shared: Arc<QueueShared>,
}

/// Cria a fila com `capacity` pacotes (mínimo 1).
pub fn packet_queue(capacity: usize) -> (PacketSender, PacketReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let shared = Arc::new(QueueShared {
        producers: AtomicUsize::new(1),
        ..Default::default()
    });
    (
        PacketSender {
            tx,
            evict: rx.clone(),
            shared: shared.clone(),
        },
        PacketReceiver { rx, shared },
    )
}

impl PacketSender {
    pub fn enqueue(&self, packet: Packet) -> Result<Enqueued, QueueClosed> {
        if self.shared.consumer_gone.load(Ordering::Acquire) {
            return Err(QueueClosed);
        }

        let mut outcome = Enqueued::Queued;
        let mut packet = packet;
        loop {
            match self.tx.try_send(packet) {
                Ok(()) => return Ok(outcome),
                Err(TrySendError::Full(back)) => {
                    // O consumidor pode ter esvaziado a fila no meio tempo;
                    // nesse caso a próxima tentativa entra sem descarte.
                    if self.evict.try_recv().is_ok() {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                        outcome = Enqueued::DroppedOldest;
                    }
                    packet = back;
                }
                Err(TrySendError::Disconnected(_)) => return Err(QueueClosed),
            }
        }
    }

    /// Total de pacotes descartados por overflow.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Clone for PacketSender {
    fn clone(&self) -> Self {
        self.shared.producers.fetch_add(1, Ordering::AcqRel);
        Self {
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl Drop for PacketSender {
    fn drop(&mut self) {
        self.shared.producers.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PacketReceiver {
    /// Bloqueia até chegar um pacote, o encerramento ou o fechamento da fila.
    pub fn dequeue(&self, shutdown: &Shutdown) -> Dequeued {
        if shutdown.is_triggered() {
            return Dequeued::Shutdown;
        }
        select! {
            recv(self.rx) -> msg => match msg {
                Ok(packet) => Dequeued::Packet(packet),
                Err(_) => Dequeued::Closed,
            },
            recv(shutdown.receiver()) -> _ => Dequeued::Shutdown,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Todos os produtores encerraram e não resta pacote na fila.
    ///
    /// Não bloqueia; usado pela sessão enquanto não há dispositivo.
    pub fn is_closed(&self) -> bool {
        self.shared.producers.load(Ordering::Acquire) == 0 && self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for PacketReceiver {
    fn drop(&mut self) {
        self.shared.consumer_gone.store(true, Ordering::Release);
    }
}
