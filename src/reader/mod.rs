pub mod shard_reader;
