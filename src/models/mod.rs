mod record;
mod request;

pub use record::{RankChange, Record};
pub use request::{
    AuthMode, ChartQuery, ExtractionRequest, RequestDefaults, SlugError, StartRequest,
    CHART_BASE_URL,
};
