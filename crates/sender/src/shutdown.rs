//! Sinal de encerramento compartilhado entre as threads.
//!
//! Nada é enviado pelo channel: o trigger apenas derruba o lado emissor e
//! todo receptor acorda com `Disconnected`, inclusive dentro de `select!`.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::sync::Mutex;
use std::time::Duration;

/// Dispara o encerramento. Idempotente.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: Mutex<Option<Sender<()>>>,
}

/// Lado observador, clonável para cada thread.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Receiver<()>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = bounded::<()>(0);
    (
        ShutdownTrigger {
            tx: Mutex::new(Some(tx)),
        },
        Shutdown { rx },
    )
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // Mutex envenenado: o Sender ainda está lá dentro, derruba mesmo assim.
        let mut guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Dorme até `timeout` ou até o encerramento. Retorna `true` se encerrou.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Receiver para uso em `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
