//! The chat feed.
//!
//! [`FeedController`] mediates between the auth state, the message length limit and
//! the live feed subscription. It only talks to the services through the traits in
//! [`adapters`], so the same controller runs against Firebase
//! ([`adapters::firebase`]) or fully in memory ([`memory`]).
//!
//! # Examples
//!
//! ```rust,ignore
//! # use friendlychat::chat::{Command, FeedController};
//! let (commands, rx) = tokio::sync::mpsc::channel(16);
//! let controller = FeedController::new(adapters, sign_in, |key: &PushKey, message: &Message| {
//!     println!("{key}: {}", message.name());
//! }, settings);
//! tokio::spawn(controller.run(rx));
//! commands.send(Command::Input("hello".into())).await?;
//! commands.send(Command::Send).await?;
//! ```

pub mod adapters;
pub mod composer;
pub mod controller;
pub mod memory;
pub mod message;

#[cfg(test)]
mod tests;

pub use adapters::{
    BlobError, BlobStore, ConfigFetchError, FeedSubscription, FeedView, IdentityError,
    IdentityProvider, MessageStore, PickedPhoto, RemoteConfigSource, SignInFlow, SignInOutcome,
    StoreError, SubscriptionHandle,
};
pub use composer::{LengthFilter, MessageComposer};
pub use controller::{ChatAdapters, ChatError, Command, Delivery, FeedController, Flow, Session};
pub use message::{FeedEvent, Message, MessageBody, PushKey, ANONYMOUS};
