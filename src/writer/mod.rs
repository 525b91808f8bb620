pub mod shard_writer;
pub mod writer_group;
