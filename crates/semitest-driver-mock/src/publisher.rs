//! Result sink that keeps everything it is given.

use parking_lot::Mutex;
use semitest_core::capabilities::ResultPublisher;
use semitest_core::settings::ChannelValue;

#[derive(Debug, Clone, PartialEq)]
pub enum PublishedResult {
    PerSite { tag: String, values: Vec<f64> },
    PerChannel { tag: String, values: Vec<ChannelValue> },
}

impl PublishedResult {
    pub fn tag(&self) -> &str {
        match self {
            Self::PerSite { tag, .. } | Self::PerChannel { tag, .. } => tag,
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingPublisher {
    results: Mutex<Vec<PublishedResult>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publication order.
    pub fn results(&self) -> Vec<PublishedResult> {
        self.results.lock().clone()
    }

    /// The most recent per-site vector published under `tag`.
    pub fn per_site(&self, tag: &str) -> Option<Vec<f64>> {
        self.results.lock().iter().rev().find_map(|r| match r {
            PublishedResult::PerSite { tag: t, values } if t == tag => Some(values.clone()),
            _ => None,
        })
    }

    /// Every per-channel value published under `tag`, in publication order.
    pub fn per_channel(&self, tag: &str) -> Vec<ChannelValue> {
        self.results
            .lock()
            .iter()
            .filter_map(|r| match r {
                PublishedResult::PerChannel { tag: t, values } if t == tag => Some(values.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn clear(&self) {
        self.results.lock().clear();
    }
}

impl ResultPublisher for RecordingPublisher {
    fn publish_per_site(&self, values: &[f64], tag: &str) {
        tracing::debug!(tag, values = ?values, "published per-site result");
        self.results.lock().push(PublishedResult::PerSite {
            tag: tag.to_string(),
            values: values.to_vec(),
        });
    }

    fn publish_per_channel(&self, values: &[ChannelValue], tag: &str) {
        tracing::debug!(tag, channels = values.len(), "published per-channel result");
        self.results.lock().push(PublishedResult::PerChannel {
            tag: tag.to_string(),
            values: values.to_vec(),
        });
    }
}
