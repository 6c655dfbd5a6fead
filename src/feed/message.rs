use chrono::{DateTime, Utc};

use crate::gtfs_rt::feed_header::Incrementality;
use crate::gtfs_rt::{FeedEntity, FeedHeader, FeedMessage};

pub const GTFS_REALTIME_VERSION: &str = "0.2";

/// Wraps `entities` in a full-dataset message stamped with `generated_at`.
pub fn build_feed_message(entities: Vec<FeedEntity>, generated_at: DateTime<Utc>) -> FeedMessage {
    let mut message = empty_feed_message();
    message.header.timestamp = u64::try_from(generated_at.timestamp()).ok();
    message.entity = entities;
    message
}

pub(crate) fn empty_feed_message() -> FeedMessage {
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: GTFS_REALTIME_VERSION.to_string(),
            incrementality: Some(Incrementality::FullDataset as i32),
            timestamp: None,
            feed_version: None,
        },
        entity: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{TripDescriptor, TripUpdate};
    use crate::parser::parse_feed;
    use chrono::TimeZone;
    use prost::Message;

    #[test]
    fn test_header_fields() {
        let at = Utc.timestamp_opt(1_677_405_600, 0).unwrap();
        let message = build_feed_message(vec![], at);
        assert_eq!(message.header.gtfs_realtime_version, "0.2");
        assert_eq!(message.header.incrementality(), Incrementality::FullDataset);
        assert_eq!(message.header.timestamp, Some(1_677_405_600));
        assert!(message.entity.is_empty());
    }

    #[test]
    fn test_encoded_message_decodes_to_same_message() {
        let entity = FeedEntity {
            id: "1".to_string(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor {
                    route_id: Some("859".to_string()),
                    direction_id: Some(1),
                    ..Default::default()
                },
                timestamp: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        let message = build_feed_message(vec![entity], Utc.timestamp_opt(20, 0).unwrap());

        let decoded = parse_feed(&message.encode_to_vec()).unwrap();
        assert_eq!(decoded, message);
    }
}
