use crate::storage::Storage;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const BANNER_TTL: Duration = Duration::from_secs(5);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    System,
    Audio,
    #[default]
    Both,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Default,
    Granted,
    Denied,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub system_permission: Permission,
}

fn default_enabled() -> bool {
    true
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notification_type: NotificationType::Both,
            system_permission: Permission::Default,
        }
    }
}

pub trait Notifier {
    /// Returns false only when nothing could be delivered.
    fn notify(&self, title: &str, message: &str) -> bool;
}

/// Whether the terminal currently has focus. Shared with the event loop.
#[derive(Clone)]
pub struct Focus(Arc<AtomicBool>);

impl Default for Focus {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Focus {
    pub fn set(&self, visible: bool) {
        self.0.store(visible, Ordering::Relaxed);
    }

    pub fn is_visible(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannerMessage {
    pub title: String,
    pub message: String,
}

/// In-app notice rendered by the TUI for [`BANNER_TTL`].
#[derive(Clone, Default)]
pub struct Banner {
    slot: Arc<Mutex<Option<(BannerMessage, Instant)>>>,
}

impl Banner {
    pub fn show(&self, title: &str, message: &str) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((
            BannerMessage {
                title: title.to_string(),
                message: message.to_string(),
            },
            Instant::now(),
        ));
    }

    pub fn current(&self) -> Option<BannerMessage> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((_, shown)) if shown.elapsed() >= BANNER_TTL => {
                *slot = None;
                None
            }
            Some((msg, _)) => Some(msg.clone()),
            None => None,
        }
    }

    pub fn dismiss(&self) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// OS-facing delivery methods.
pub trait Delivery {
    fn sound(&self) -> Result<()>;
    fn desktop(&self, title: &str, message: &str) -> Result<()>;
}

pub struct SystemDelivery;

impl Delivery for SystemDelivery {
    fn sound(&self) -> Result<()> {
        let mut stdout = std::io::stdout();
        stdout.write_all(b"\x07")?;
        stdout.flush()?;

        std::thread::spawn(|| {
            let players = [
                ("paplay", "/usr/share/sounds/freedesktop/stereo/complete.oga"),
                ("afplay", "/System/Library/Sounds/Glass.aiff"),
                ("aplay", "/usr/share/sounds/generic.wav"),
            ];
            for (cmd, file) in players {
                let played = Command::new(cmd)
                    .arg(file)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .map(|s| s.success())
                    .unwrap_or(false);
                if played {
                    break;
                }
            }
        });
        Ok(())
    }

    fn desktop(&self, title: &str, message: &str) -> Result<()> {
        notify_rust::Notification::new()
            .summary(title)
            .body(message)
            .appname("tiblo")
            .show()
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("desktop notification failed: {}", e))
    }
}

/// Asks the desktop for notification access by sending a probe notification
/// and records the outcome.
pub fn request_permission(storage: &Storage, delivery: &dyn Delivery) -> Result<Permission> {
    let mut config = storage.load_notification_config()?;
    if config.system_permission != Permission::Default {
        return Ok(config.system_permission);
    }

    config.system_permission = match delivery.desktop("tiblo", "Notifications enabled") {
        Ok(()) => Permission::Granted,
        Err(e) => {
            warn!("Notification permission probe failed: {:#}", e);
            Permission::Denied
        }
    };
    storage.save_notification_config(&config)?;
    Ok(config.system_permission)
}

/// Sound, then desktop notification when unfocused, then the in-app banner
/// as the fallback that always works.
pub struct DesktopNotifier<D: Delivery = SystemDelivery> {
    storage: Storage,
    banner: Banner,
    focus: Focus,
    delivery: D,
}

impl DesktopNotifier<SystemDelivery> {
    pub fn new(storage: Storage, banner: Banner, focus: Focus) -> Self {
        Self::with_delivery(storage, banner, focus, SystemDelivery)
    }
}

impl<D: Delivery> DesktopNotifier<D> {
    pub fn with_delivery(storage: Storage, banner: Banner, focus: Focus, delivery: D) -> Self {
        Self {
            storage,
            banner,
            focus,
            delivery,
        }
    }
}

impl<D: Delivery> Notifier for DesktopNotifier<D> {
    fn notify(&self, title: &str, message: &str) -> bool {
        let config = match self.storage.load_notification_config() {
            Ok(config) => config,
            Err(e) => {
                warn!("Falling back to default notification config: {:#}", e);
                NotificationConfig::default()
            }
        };

        if !config.enabled {
            info!("Notifications are disabled");
            return false;
        }

        let visible = self.focus.is_visible();
        let mut delivered = false;

        match self.delivery.sound() {
            Ok(()) => delivered = true,
            Err(e) => error!("Failed to play notification sound: {:#}", e),
        }

        if !visible && config.notification_type != NotificationType::Audio {
            match config.system_permission {
                Permission::Granted => match self.delivery.desktop(title, message) {
                    Ok(()) => delivered = true,
                    Err(e) => error!("Failed to show system notification: {:#}", e),
                },
                // The first background notification doubles as the permission probe.
                Permission::Default => {
                    let permission = match self.delivery.desktop(title, message) {
                        Ok(()) => {
                            delivered = true;
                            Permission::Granted
                        }
                        Err(e) => {
                            warn!("Desktop notifications unavailable: {:#}", e);
                            Permission::Denied
                        }
                    };
                    let updated = NotificationConfig {
                        system_permission: permission,
                        ..config.clone()
                    };
                    if let Err(e) = self.storage.save_notification_config(&updated) {
                        error!("Failed to save notification permission: {:#}", e);
                    }
                }
                Permission::Denied => {}
            }
        }

        if visible || !delivered {
            self.banner.show(title, message);
            delivered = true;
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeDelivery {
        sound_ok: bool,
        desktop_ok: bool,
        desktop_calls: RefCell<Vec<String>>,
    }

    impl Delivery for FakeDelivery {
        fn sound(&self) -> Result<()> {
            if self.sound_ok {
                Ok(())
            } else {
                anyhow::bail!("no audio device")
            }
        }

        fn desktop(&self, title: &str, _message: &str) -> Result<()> {
            self.desktop_calls.borrow_mut().push(title.to_string());
            if self.desktop_ok {
                Ok(())
            } else {
                anyhow::bail!("no notification daemon")
            }
        }
    }

    fn notifier(
        storage: &Storage,
        visible: bool,
        delivery: FakeDelivery,
    ) -> (DesktopNotifier<FakeDelivery>, Banner) {
        let banner = Banner::default();
        let focus = Focus::default();
        focus.set(visible);
        (
            DesktopNotifier::with_delivery(storage.clone(), banner.clone(), focus, delivery),
            banner,
        )
    }

    #[test]
    fn test_disabled_delivers_nothing() {
        let storage = Storage::in_memory();
        storage
            .save_notification_config(&NotificationConfig {
                enabled: false,
                ..NotificationConfig::default()
            })
            .unwrap();
        let (n, banner) = notifier(&storage, true, FakeDelivery::default());

        assert!(!n.notify("Tiblo", "done"));
        assert!(banner.current().is_none());
    }

    #[test]
    fn test_visible_shows_banner_without_desktop() {
        let storage = Storage::in_memory();
        let delivery = FakeDelivery {
            sound_ok: true,
            desktop_ok: true,
            ..FakeDelivery::default()
        };
        let (n, banner) = notifier(&storage, true, delivery);

        assert!(n.notify("Tiblo", "Productivity block completed!"));
        assert_eq!(banner.current().unwrap().message, "Productivity block completed!");
        assert!(n.delivery.desktop_calls.borrow().is_empty());
    }

    #[test]
    fn test_first_background_notification_settles_permission() {
        let storage = Storage::in_memory();
        let delivery = FakeDelivery {
            sound_ok: true,
            desktop_ok: true,
            ..FakeDelivery::default()
        };
        let (n, banner) = notifier(&storage, false, delivery);

        assert!(n.notify("Tiblo", "done"));
        // the completion itself is the first desktop notification
        assert_eq!(*n.delivery.desktop_calls.borrow(), vec!["Tiblo".to_string()]);

        assert!(n.notify("Tiblo", "again"));
        assert_eq!(n.delivery.desktop_calls.borrow().len(), 2);
        assert!(banner.current().is_none());
        assert_eq!(
            storage.load_notification_config().unwrap().system_permission,
            Permission::Granted
        );
    }

    #[test]
    fn test_everything_failing_falls_back_to_banner() {
        let storage = Storage::in_memory();
        let (n, banner) = notifier(&storage, false, FakeDelivery::default());

        assert!(n.notify("Tiblo", "done"));
        assert!(banner.current().is_some());
        assert_eq!(
            storage.load_notification_config().unwrap().system_permission,
            Permission::Denied
        );
    }

    #[test]
    fn test_audio_only_skips_desktop() {
        let storage = Storage::in_memory();
        storage
            .save_notification_config(&NotificationConfig {
                notification_type: NotificationType::Audio,
                system_permission: Permission::Granted,
                ..NotificationConfig::default()
            })
            .unwrap();
        let delivery = FakeDelivery {
            sound_ok: true,
            desktop_ok: true,
            ..FakeDelivery::default()
        };
        let (n, banner) = notifier(&storage, false, delivery);

        assert!(n.notify("Tiblo", "done"));
        assert!(n.delivery.desktop_calls.borrow().is_empty());
        assert!(banner.current().is_none());
    }

    #[test]
    fn test_banner_dismiss() {
        let banner = Banner::default();
        banner.show("a", "b");
        assert!(banner.current().is_some());
        banner.dismiss();
        assert!(banner.current().is_none());
    }
}
