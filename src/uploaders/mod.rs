pub mod multipart;
pub mod part;
pub mod progress_stream;
pub mod source;
pub mod transport;

pub use multipart::{split_parts, MultipartUpload, PartRange};
pub use part::{part_timeout, PartUploader};
pub use progress_stream::{PartProgressFn, ProgressStream};
pub use source::ByteSource;
pub use transport::HttpPartTransport;
