pub mod index_config;
pub mod index_shard;
pub mod maintenance;
pub mod sharded_index;
