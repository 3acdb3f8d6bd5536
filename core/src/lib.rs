pub mod error;
pub mod filter;
pub mod fnv;
pub mod id;
pub mod mime;
pub mod model;
pub mod session;
pub mod traits;
pub mod uri;

pub use error::{AppError, Cancelled, ErrorKind, Result};
pub use model::{Enclosure, FeedAndItems, FeedDescriptor, FeedDocument, FeedListEntry, FeedListPayload, FeedMetaPayload, Image, Item, Link, Person};
pub use session::Session;
pub use traits::{
    AddFeedRequest, DynamicFeedManager, FeedStore, FetchedImage, ImageStore, ManagedFeedInfo, RemovedFeedInfo, ResourceNotifier, UpdateFeedMetadataRequest,
};
pub use uri::ResourceKind;
