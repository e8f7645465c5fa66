pub mod dead_letter;
pub mod elasticsearch;
pub mod index_sink;

pub use dead_letter::{DeadLetterReason, DeadLetterRecord, DeadLetterSink, KafkaDeadLetterSink};
pub use elasticsearch::{ElasticsearchError, ElasticsearchIndexSink};
pub use index_sink::IndexSink;
