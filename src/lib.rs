pub mod clock;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod parser;
pub mod server;
pub mod source;
pub mod static_data;
pub mod stats;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
