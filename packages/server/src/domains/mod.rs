pub mod channel;
pub mod notification;
pub mod subscriber;
pub mod summary;
pub mod video;

pub use channel::Channel;
pub use notification::NotificationJob;
pub use subscriber::Subscriber;
pub use summary::Summary;
pub use video::{Video, VideoUpload};
