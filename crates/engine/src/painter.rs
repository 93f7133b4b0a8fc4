use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use render_protocol::RepaintRequester;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PainterThreadError {
    #[error("failed to spawn painter thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("painter thread exited before signalling ready")]
    ExitedBeforeReady,
}

/// Wakes the painter thread. Requests issued while a wake is pending collapse
/// into one `paint` call.
#[derive(Debug, Clone)]
pub struct RepaintHandle {
    notify_sender: Sender<()>,
}

impl RepaintHandle {
    pub fn request(&self) {
        match self.notify_sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::debug!("repaint requested after painter thread shut down");
            }
        }
    }
}

impl RepaintRequester for RepaintHandle {
    fn request_repaint(&self) {
        self.request();
    }
}

/// Dedicated thread that calls `paint` whenever a repaint is requested.
///
/// Dropping the handle stops the loop and joins the thread.
pub struct PainterThread {
    shutdown_sender: Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl PainterThread {
    /// Spawns the painter and blocks until its loop is running.
    pub fn spawn<F>(name: &str, paint: F) -> Result<(Self, RepaintHandle), PainterThreadError>
    where
        F: FnMut() + Send + 'static,
    {
        let (notify_sender, notify_receiver) = bounded(1);
        let (shutdown_sender, shutdown_receiver) = bounded(1);
        let (ready_sender, ready_receiver) = bounded(1);

        let join_handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || painter_loop(paint, ready_sender, notify_receiver, shutdown_receiver))?;

        if ready_receiver.recv().is_err() {
            let _ = join_handle.join();
            return Err(PainterThreadError::ExitedBeforeReady);
        }

        Ok((
            Self {
                shutdown_sender,
                join_handle: Some(join_handle),
            },
            RepaintHandle { notify_sender },
        ))
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown_sender.try_send(());
        let Some(join_handle) = self.join_handle.take() else {
            return;
        };
        if join_handle.join().is_err() {
            tracing::error!("painter thread panicked");
        }
    }
}

impl Drop for PainterThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn painter_loop<F>(
    mut paint: F,
    ready_sender: Sender<()>,
    notify_receiver: Receiver<()>,
    shutdown_receiver: Receiver<()>,
) where
    F: FnMut(),
{
    if ready_sender.send(()).is_err() {
        return;
    }
    drop(ready_sender);
    loop {
        select! {
            recv(shutdown_receiver) -> _ => return,
            recv(notify_receiver) -> message => {
                if message.is_err() {
                    return;
                }
                if !shutdown_receiver.is_empty() {
                    return;
                }
                paint();
            }
        }
    }
}
