pub mod blocker;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod http_session;
pub mod pagination;
pub mod rate_limit;
pub mod session;

pub use blocker::{classify, BlockerKind, BlockerVerdict, ClassifierThresholds, RenderSignals};
pub use error::ScraperError;
pub use extract::{count_structured_products, Extractor, JsonLdExtractor, MicrodataExtractor};
pub use gateway::{FetchMeta, GatewayResponse, RateLimitedGateway};
pub use http_session::HttpSession;
pub use pagination::{page_url, PaginationTracker};
pub use session::{
    dismiss_cookies, probe_signals, select_store, FrameScope, Navigation, Session, WaitCondition,
};
