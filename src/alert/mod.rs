//! In-page alert: a short chime, falling back to vibration, falling back to a
//! log line. Never fails the caller.

#[cfg(feature = "audio")]
pub mod beep;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use log::{info, warn};

use crate::error::NotifyError;

pub const ALARM_VIBRATION: [u64; 5] = [200, 100, 200, 100, 200];

pub trait Alerter: Send + Sync {
    fn play_alarm(&self) -> Result<(), NotifyError>;

    fn vibrate(&self, pattern: &[u64]) -> Result<(), NotifyError>;
}

pub type SharedAlerter = Arc<dyn Alerter>;

/// Plays the alarm, vibrating instead when sound is unavailable.
pub fn sound_alarm(alerter: &dyn Alerter) {
    if let Err(err) = alerter.play_alarm() {
        warn!("Alarm sound unavailable: {err}");
        if let Err(err) = alerter.vibrate(&ALARM_VIBRATION) {
            warn!("Vibration unavailable: {err}");
        }
    }
}

/// Headless hosts: no speaker, no vibration motor.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn play_alarm(&self) -> Result<(), NotifyError> {
        info!("Timer alarm");
        Ok(())
    }

    fn vibrate(&self, _pattern: &[u64]) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable("no vibration device".into()))
    }
}

/// Counts alerts instead of producing them.
#[derive(Debug, Default)]
pub struct RecordingAlerter {
    alarms: AtomicUsize,
    vibrations: Mutex<Vec<Vec<u64>>>,
    sound_available: bool,
}

impl RecordingAlerter {
    pub fn new() -> Self {
        Self {
            sound_available: true,
            ..Self::default()
        }
    }

    pub fn without_sound() -> Self {
        Self::default()
    }

    pub fn alarms(&self) -> usize {
        self.alarms.load(Ordering::SeqCst)
    }

    pub fn vibrations(&self) -> Vec<Vec<u64>> {
        self.vibrations
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Alerter for RecordingAlerter {
    fn play_alarm(&self) -> Result<(), NotifyError> {
        if !self.sound_available {
            return Err(NotifyError::Unavailable("muted".into()));
        }
        self.alarms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn vibrate(&self, pattern: &[u64]) -> Result<(), NotifyError> {
        if let Ok(mut guard) = self.vibrations.lock() {
            guard.push(pattern.to_vec());
        }
        Ok(())
    }
}

#[cfg(feature = "audio")]
pub use device::AudioAlerter;

#[cfg(feature = "audio")]
mod device {
    use super::{beep::Beep, Alerter};
    use crate::error::NotifyError;

    use rodio::{OutputStream, Sink};
    use std::sync::{
        mpsc::{self, Sender},
        Mutex,
    };
    use std::thread;

    enum AudioCommand {
        Beep,
    }

    /// Owns a dedicated audio thread, since the output stream is not `Send`.
    pub struct AudioAlerter {
        tx: Mutex<Option<Sender<AudioCommand>>>,
    }

    impl AudioAlerter {
        pub fn new() -> Self {
            Self {
                tx: Mutex::new(None),
            }
        }

        fn ensure_thread(&self) -> Result<Sender<AudioCommand>, NotifyError> {
            let mut guard = self
                .tx
                .lock()
                .map_err(|e| NotifyError::Unavailable(e.to_string()))?;
            if let Some(tx) = guard.as_ref() {
                return Ok(tx.clone());
            }

            let (tx, rx) = mpsc::channel::<AudioCommand>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

            thread::Builder::new()
                .name("alarm-audio".to_string())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(pair) => pair,
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!(
                                "Failed to create audio output stream: {e}"
                            )));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    while let Ok(cmd) = rx.recv() {
                        match cmd {
                            AudioCommand::Beep => match Sink::try_new(&handle) {
                                Ok(sink) => {
                                    sink.append(Beep::new());
                                    sink.detach();
                                }
                                Err(e) => log::warn!("Failed to create audio sink: {e}"),
                            },
                        }
                    }
                })
                .map_err(|e| NotifyError::Unavailable(e.to_string()))?;

            ready_rx
                .recv()
                .map_err(|e| NotifyError::Unavailable(e.to_string()))?
                .map_err(NotifyError::Unavailable)?;

            *guard = Some(tx.clone());
            Ok(tx)
        }
    }

    impl Default for AudioAlerter {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Alerter for AudioAlerter {
        fn play_alarm(&self) -> Result<(), NotifyError> {
            let tx = self.ensure_thread()?;
            tx.send(AudioCommand::Beep)
                .map_err(|e| NotifyError::Unavailable(e.to_string()))
        }

        fn vibrate(&self, _pattern: &[u64]) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("no vibration device".into()))
        }
    }
}
