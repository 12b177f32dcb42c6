//! UNUserNotificationCenter wrapper.
//!
//! Completion handlers run on an arbitrary queue; results are only logged,
//! which keeps every call here fire-and-forget.

use block2::RcBlock;
use objc2::rc::Retained;
use objc2::runtime::Bool;
use objc2_foundation::{NSError, NSString};
use objc2_user_notifications::{
    UNAuthorizationOptions, UNMutableNotificationContent, UNNotificationRequest,
    UNUserNotificationCenter,
};

pub struct NotificationCenter;

impl NotificationCenter {
    #[must_use]
    pub fn current() -> Retained<UNUserNotificationCenter> {
        UNUserNotificationCenter::currentNotificationCenter()
    }

    /// Asks for permission once; the answer arrives later and is logged.
    pub fn request_authorization() {
        let options = UNAuthorizationOptions::Alert | UNAuthorizationOptions::Sound;

        let block = RcBlock::new(|granted: Bool, error: *mut NSError| {
            if let Some(err) = unsafe { error.as_ref() } {
                tracing::warn!("通知許可の取得に失敗しました: {}", err.localizedDescription());
            } else if !granted.as_bool() {
                tracing::warn!("通知許可が拒否されています");
            }
        });

        Self::current().requestAuthorizationWithOptions_completionHandler(options, &block);
    }

    /// Queues a notice for immediate delivery.
    pub fn add(id: &str, content: &UNMutableNotificationContent) {
        let identifier = NSString::from_str(id);
        let request =
            UNNotificationRequest::requestWithIdentifier_content_trigger(&identifier, content, None);

        let block = RcBlock::new(|error: *mut NSError| {
            if let Some(err) = unsafe { error.as_ref() } {
                tracing::warn!("通知の送信に失敗しました: {}", err.localizedDescription());
            }
        });

        Self::current().addNotificationRequest_withCompletionHandler(&request, Some(&block));
    }
}
