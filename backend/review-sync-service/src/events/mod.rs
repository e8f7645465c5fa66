pub mod decoder;
pub mod kafka;
pub mod model;
pub mod source;

pub use decoder::decode;
pub use kafka::KafkaMessageSource;
pub use model::{ChangeEvent, FieldValue, Operation, RowPayload};
pub use source::{MessageSource, PartitionId, Position, SourceMessage};
