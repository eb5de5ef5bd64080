use rdkafka::ClientConfig;

/// Kafka consumer configuration builder for the parallel consumer.
///
/// Offsets are only ever committed explicitly, so auto commit and auto offset
/// store are always disabled.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id);

        config
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "5000")
            .set("max.poll.interval.ms", "300000");

        Self { config }
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.config.set("client.id", client_id);
        self
    }

    /// Add any custom configuration
    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.config.set(key, value);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_commits_only() {
        let config = ConsumerConfigBuilder::new("localhost:9092", "group")
            .with_offset_reset("latest")
            .build();

        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("group.id"), Some("group"));
    }

    #[test]
    fn test_tls_is_opt_in() {
        let plain = ConsumerConfigBuilder::new("localhost:9092", "group")
            .with_tls(false)
            .build();
        let tls = ConsumerConfigBuilder::new("localhost:9092", "group")
            .with_tls(true)
            .set("fetch.min.bytes", "1")
            .build();

        assert_eq!(plain.get("security.protocol"), None);
        assert_eq!(tls.get("security.protocol"), Some("ssl"));
        assert_eq!(tls.get("fetch.min.bytes"), Some("1"));
    }
}
