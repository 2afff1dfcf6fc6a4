// User-facing notifications
// Fire-and-forget signals from the core to whatever renders them

use tokio::sync::mpsc;

/// Signal for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Error(String),
    Success(String),
    /// Session rejected, redirect to login
    Unauthorized,
    /// Session superseded by a login on another device
    AnotherDeviceLogin,
}

/// Sink for notifications, passed explicitly to whoever emits them
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);

    fn show_error(&self, message: &str) {
        self.notify(Notification::Error(message.to_string()));
    }

    fn show_success(&self, message: &str) {
        self.notify(Notification::Success(message.to_string()));
    }

    fn unauthorized(&self) {
        self.notify(Notification::Unauthorized);
    }

    fn another_device_login(&self) {
        self.notify(Notification::AnotherDeviceLogin);
    }
}

/// Forwards notifications into an unbounded channel the UI drains
#[derive(Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // Receiver gone means nobody is listening any more
        if self.sender.send(notification).is_err() {
            tracing::debug!("Notification dropped, receiver closed");
        }
    }
}

/// Writes notifications to the log
#[derive(Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Error(message) => tracing::error!("{}", message),
            Notification::Success(message) => tracing::info!("{}", message),
            Notification::Unauthorized => tracing::warn!("Session expired, please log in again"),
            Notification::AnotherDeviceLogin => {
                tracing::warn!("Logged in on another device, this session has ended")
            }
        }
    }
}
