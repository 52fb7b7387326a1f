use cadence::prelude::*;
use cadence::{BufferedUdpMetricSink, MetricBuilder, QueuingMetricSink, StatsdClient};
use log::{debug, info, warn};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::RwLock;

use super::MetricSink;
use crate::config::ExportConfig;
use crate::error::{ExportError, Result};

/// Size of the UDP payload buffer before a datagram is sent
const UDP_BUFFER_CAPACITY: usize = 1432;

/// Samples queued for the background writer before new ones are dropped
const QUEUE_CAPACITY: usize = 64 * 1024;

/// DogStatsD client writing over UDP from a background thread
pub struct StatsdSink {
    /// `None` once closed
    client: RwLock<Option<StatsdClient>>,
    name: String,
}

impl StatsdSink {
    /// Build a client for `host:port` whose metric names start with `prefix`
    pub fn connect(prefix: &str, host: &str, port: u16) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ExportError::Sink(format!("Failed to resolve {}:{}", host, port)))?;

        let bind_ip = match addr {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0))?;
        socket.set_nonblocking(true)?;

        let udp = BufferedUdpMetricSink::with_capacity(addr, socket, UDP_BUFFER_CAPACITY)?;
        let queuing = QueuingMetricSink::with_capacity(udp, QUEUE_CAPACITY);

        let client = StatsdClient::builder(prefix, queuing)
            .with_error_handler(|err| warn!("Failed to send sample to DogStatsD: {}", err))
            .build();

        info!("Created DogStatsD client for {}:{} (prefix '{}')", host, port, prefix);

        Ok(Self {
            client: RwLock::new(Some(client)),
            name: format!("dogstatsd://{}:{}", host, port),
        })
    }

    /// Build a client from an export configuration
    pub fn from_config(config: &ExportConfig) -> Result<Self> {
        Self::connect(&config.prefix, &config.collector_host, config.collector_port)
    }

    fn with_client<F>(&self, metric: &str, f: F) -> Result<()>
    where
        F: FnOnce(&StatsdClient) -> Result<()>,
    {
        let guard = self
            .client
            .read()
            .map_err(|_| ExportError::Sink("Lock poisoned".to_string()))?;

        match guard.as_ref() {
            Some(client) => f(client),
            None => {
                debug!("Dropping sample {} written after close", metric);
                Ok(())
            }
        }
    }
}

fn send_tagged<'m, T>(mut builder: MetricBuilder<'m, '_, T>, tags: &'m [String]) -> Result<()>
where
    T: cadence::Metric + From<String>,
{
    for tag in tags {
        builder = builder.with_tag_value(tag);
    }
    builder.try_send()?;
    Ok(())
}

impl MetricSink for StatsdSink {
    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<()> {
        self.with_client(name, |client| {
            send_tagged(client.gauge_with_tags(name, value), tags)
        })
    }

    fn count(&self, name: &str, value: i64, tags: &[String]) -> Result<()> {
        self.with_client(name, |client| {
            send_tagged(client.count_with_tags(name, value), tags)
        })
    }

    fn distribution(&self, name: &str, value: f64, count: u64, tags: &[String]) -> Result<()> {
        // A rate of 0 is never put on the wire; empty buckets carry no samples
        if count == 0 {
            debug!("Skipping empty bucket {} <= {}", name, value);
            return Ok(());
        }

        // The observation count travels as the sample rate field, the way
        // the collector-side aggregation expects histogram buckets.
        // Counts above 2^53 lose precision as f64.
        self.with_client(name, |client| {
            let builder = client
                .distribution_with_tags(name, value)
                .with_sampling_rate(count as f64);
            send_tagged(builder, tags)
        })
    }

    fn close(&self) -> Result<()> {
        let mut guard = self
            .client
            .write()
            .map_err(|_| ExportError::Sink("Lock poisoned".to_string()))?;

        // Dropping the client drains the queue and flushes the UDP buffer
        if guard.take().is_some() {
            info!("Closed DogStatsD client {}", self.name);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collector() -> (UdpSocket, u16) {
        let collector = UdpSocket::bind("127.0.0.1:0").unwrap();
        collector
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let port = collector.local_addr().unwrap().port();
        (collector, port)
    }

    /// Every statsd line received until the collector goes quiet
    fn received_lines(collector: &UdpSocket) -> Vec<String> {
        let mut lines = Vec::new();
        let mut buf = [0u8; 65536];
        while let Ok(len) = collector.recv(&mut buf) {
            let payload = String::from_utf8_lossy(&buf[..len]);
            lines.extend(
                payload
                    .split('\n')
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        lines
    }

    #[test]
    fn test_writes_to_local_collector() {
        let (collector, port) = collector();

        let sink = StatsdSink::connect("statsd", "127.0.0.1", port).unwrap();
        sink.gauge("jvm.mem", 512.0, &["env:prod".to_string()])
            .unwrap();
        sink.count("requests", 3, &[]).unwrap();
        sink.distribution(
            "latency",
            10.0,
            5,
            &["method:get".to_string(), "env:prod".to_string()],
        )
        .unwrap();
        sink.close().unwrap();

        assert_eq!(sink.name(), format!("dogstatsd://127.0.0.1:{}", port));
        assert_eq!(
            received_lines(&collector),
            vec![
                "statsd.jvm.mem:512|g|#env:prod",
                "statsd.requests:3|c",
                "statsd.latency:10|d|@5|#method:get,env:prod",
            ]
        );
    }

    #[test]
    fn test_empty_bucket_is_not_sent() {
        let (collector, port) = collector();
        let tags = ["env:prod".to_string()];

        let sink = StatsdSink::connect("statsd", "127.0.0.1", port).unwrap();
        sink.distribution("latency", 10.0, 5, &tags).unwrap();
        sink.distribution("latency", 50.0, 0, &tags).unwrap();
        sink.distribution("latency", 100.0, 1, &tags).unwrap();
        sink.close().unwrap();

        assert_eq!(
            received_lines(&collector),
            vec![
                "statsd.latency:10|d|@5|#env:prod",
                "statsd.latency:100|d|@1|#env:prod",
            ]
        );
    }

    #[test]
    fn test_close_is_idempotent_and_drops_later_writes() {
        let collector = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = collector.local_addr().unwrap().port();

        let sink = StatsdSink::connect("statsd", "127.0.0.1", port).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.gauge("late", 1.0, &[]).is_ok());
    }

    #[test]
    fn test_unresolvable_host_is_sink_error() {
        let result = StatsdSink::connect("statsd", "host.invalid.", 8125);
        assert!(matches!(result, Err(ExportError::Sink(_))));
    }
}
