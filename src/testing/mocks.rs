//! Mock implementations for testing
//!
//! Provides mock Device, PubSubClient, ClientFactory and NetworkLink
//! implementations so the engine can be exercised without a broker or hardware.
//! Clones share state, so a test can hand one copy to the engine and inspect
//! another.

use crate::device::{Device, DeviceError};
use crate::transport::{
    BrokerEvent, ClientError, ClientFactory, LinkFlag, NetworkLink, PubSubClient, ServiceError,
    SessionOptions,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One device operation, as recorded by [`MockDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    ReadDigital(u8),
    WriteDigital(u8, bool),
    ReadAnalog(u8),
    WriteAnalog(u8, u16),
    ReadPwm(u8),
    WritePwm(u8, u16),
    WriteDisplay(String),
    ReadDisplay,
    Reboot,
}

/// Cross-component ordering record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Device(DeviceCall),
    Published(String),
}

/// Shared journal interleaving device calls and publishes
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<TraceEvent>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: TraceEvent) {
        lock(&self.0).push(event);
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        lock(&self.0).clone()
    }

    pub fn clear(&self) {
        lock(&self.0).clear();
    }
}

#[derive(Debug, Default)]
struct MockDeviceState {
    calls: Vec<DeviceCall>,
    digital_level: bool,
    analog_value: u16,
    pwm_duty: u16,
    display: String,
    failure: Option<DeviceError>,
}

/// Mock device recording every call
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockDeviceState>>,
    journal: Option<Journal>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_digital_level(self, level: bool) -> Self {
        lock(&self.state).digital_level = level;
        self
    }

    pub fn with_analog_value(self, value: u16) -> Self {
        lock(&self.state).analog_value = value;
        self
    }

    /// Every fallible operation returns `error`
    pub fn failing(self, error: DeviceError) -> Self {
        lock(&self.state).failure = Some(error);
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.state).calls.clone()
    }

    pub fn reboot_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == DeviceCall::Reboot)
            .count()
    }

    fn record(&self, call: DeviceCall) -> Result<(), DeviceError> {
        if let Some(journal) = &self.journal {
            journal.record(TraceEvent::Device(call.clone()));
        }
        let mut state = lock(&self.state);
        state.calls.push(call);
        match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Device for MockDevice {
    fn read_digital(&mut self, pin: u8) -> Result<bool, DeviceError> {
        self.record(DeviceCall::ReadDigital(pin))?;
        Ok(lock(&self.state).digital_level)
    }

    fn write_digital(&mut self, pin: u8, value: bool) -> Result<(), DeviceError> {
        self.record(DeviceCall::WriteDigital(pin, value))?;
        lock(&self.state).digital_level = value;
        Ok(())
    }

    fn read_analog(&mut self, pin: u8) -> Result<u16, DeviceError> {
        self.record(DeviceCall::ReadAnalog(pin))?;
        Ok(lock(&self.state).analog_value)
    }

    fn write_analog(&mut self, pin: u8, value: u16) -> Result<(), DeviceError> {
        self.record(DeviceCall::WriteAnalog(pin, value))?;
        lock(&self.state).analog_value = value;
        Ok(())
    }

    fn read_pwm(&mut self, pin: u8) -> Result<u16, DeviceError> {
        self.record(DeviceCall::ReadPwm(pin))?;
        Ok(lock(&self.state).pwm_duty)
    }

    fn write_pwm(&mut self, pin: u8, duty: u16) -> Result<(), DeviceError> {
        self.record(DeviceCall::WritePwm(pin, duty))?;
        lock(&self.state).pwm_duty = duty;
        Ok(())
    }

    fn write_display(&mut self, text: &str) -> Result<(), DeviceError> {
        self.record(DeviceCall::WriteDisplay(text.to_string()))?;
        lock(&self.state).display = text.to_string();
        Ok(())
    }

    fn read_display(&self) -> Result<String, DeviceError> {
        self.record(DeviceCall::ReadDisplay)?;
        Ok(lock(&self.state).display.clone())
    }

    fn reboot(&mut self) {
        // a reboot cannot fail, even on a failing mock
        let _ = self.record(DeviceCall::Reboot);
    }
}

#[derive(Debug, Default)]
struct MockClientState {
    handshakes: usize,
    handshake_failures: usize,
    subscriptions: Vec<String>,
    published: Vec<(String, String)>,
    publish_failures: bool,
    /// Publishes accepted before a flush or service call is required
    capacity: Option<usize>,
    queued: usize,
    flushes: usize,
    flush_failures: bool,
    disconnects: usize,
    events: VecDeque<BrokerEvent>,
    service_errors: VecDeque<ServiceError>,
}

/// Mock pub/sub client with scripted inbound traffic
#[derive(Debug, Clone, Default)]
pub struct MockClient {
    state: Arc<Mutex<MockClientState>>,
    journal: Option<Journal>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Bound the outbound queue like a real client's request channel
    pub fn with_capacity(self, capacity: usize) -> Self {
        lock(&self.state).capacity = Some(capacity);
        self
    }

    pub fn fail_flushes(&self, fail: bool) {
        lock(&self.state).flush_failures = fail;
    }

    pub fn flush_count(&self) -> usize {
        lock(&self.state).flushes
    }

    /// Fail the next `count` handshakes
    pub fn fail_handshakes(&self, count: usize) {
        lock(&self.state).handshake_failures = count;
    }

    pub fn fail_publishes(&self, fail: bool) {
        lock(&self.state).publish_failures = fail;
    }

    pub fn push_event(&self, event: BrokerEvent) {
        lock(&self.state).events.push_back(event);
    }

    /// Queue a live (non-retained) message
    pub fn push_message(&self, topic: &str, payload: &str) {
        self.push_event(BrokerEvent::Message {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
            retain: false,
        });
    }

    pub fn fail_next_service(&self, error: ServiceError) {
        lock(&self.state).service_errors.push_back(error);
    }

    pub fn handshake_count(&self) -> usize {
        lock(&self.state).handshakes
    }

    pub fn disconnect_count(&self) -> usize {
        lock(&self.state).disconnects
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state).subscriptions.clone()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        lock(&self.state).published.clone()
    }

    pub fn published_payloads(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn clear_published(&self) {
        lock(&self.state).published.clear();
    }
}

#[async_trait]
impl PubSubClient for MockClient {
    async fn handshake(&mut self, _timeout: Duration) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        state.handshakes += 1;
        if state.handshake_failures > 0 {
            state.handshake_failures -= 1;
            return Err(ClientError::Handshake("mock broker refused".to_string()));
        }
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        lock(&self.state).subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        if state.publish_failures {
            return Err(ClientError::Publish("mock publish failure".to_string()));
        }
        if state.capacity.is_some_and(|capacity| state.queued >= capacity) {
            return Err(ClientError::QueueFull);
        }
        state.queued += 1;
        state
            .published
            .push((topic.to_string(), payload.to_string()));
        if let Some(journal) = &self.journal {
            journal.record(TraceEvent::Published(payload.to_string()));
        }
        Ok(())
    }

    async fn flush(&mut self, _timeout: Duration) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        state.flushes += 1;
        if state.flush_failures {
            return Err(ClientError::Flush("mock flush failure".to_string()));
        }
        state.queued = 0;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        lock(&self.state).disconnects += 1;
        Ok(())
    }

    async fn next_events(&mut self, _timeout: Duration) -> Result<Vec<BrokerEvent>, ServiceError> {
        let mut state = lock(&self.state);
        if let Some(error) = state.service_errors.pop_front() {
            return Err(error);
        }
        state.queued = 0;
        Ok(state.events.drain(..).collect())
    }
}

#[derive(Debug, Default)]
struct MockFactoryState {
    clients: Vec<MockClient>,
    options: Vec<SessionOptions>,
    fail_create: bool,
    client_capacity: Option<usize>,
}

/// Factory handing out [`MockClient`]s and remembering each one
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<MockFactoryState>>,
    journal: Option<Journal>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Every client built from here on gets a bounded outbound queue
    pub fn with_client_capacity(self, capacity: usize) -> Self {
        lock(&self.state).client_capacity = Some(capacity);
        self
    }

    pub fn fail_create(&self, fail: bool) {
        lock(&self.state).fail_create = fail;
    }

    pub fn created(&self) -> usize {
        lock(&self.state).clients.len()
    }

    /// Most recently built client
    pub fn latest(&self) -> Option<MockClient> {
        lock(&self.state).clients.last().cloned()
    }

    pub fn options(&self) -> Vec<SessionOptions> {
        lock(&self.state).options.clone()
    }
}

impl ClientFactory for MockFactory {
    type Client = MockClient;

    fn create(&self, options: &SessionOptions) -> Result<MockClient, ClientError> {
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(ClientError::InvalidBrokerUrl("mock factory failure".to_string()));
        }
        let mut client = match &self.journal {
            Some(journal) => MockClient::new().with_journal(journal.clone()),
            None => MockClient::new(),
        };
        if let Some(capacity) = state.client_capacity {
            client = client.with_capacity(capacity);
        }
        state.clients.push(client.clone());
        state.options.push(options.clone());
        Ok(client)
    }
}

/// Network link toggled by the test
#[derive(Debug, Clone)]
pub struct MockLink {
    flag: LinkFlag,
}

impl MockLink {
    pub fn up() -> Self {
        Self {
            flag: LinkFlag::new(true),
        }
    }

    pub fn down() -> Self {
        Self {
            flag: LinkFlag::new(false),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.flag.set_up(up);
    }
}

impl NetworkLink for MockLink {
    fn is_up(&self) -> bool {
        self.flag.is_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_shares_state_across_clones() {
        let device = MockDevice::new();
        let mut handle = device.clone();
        handle.write_digital(1, true).unwrap();
        assert_eq!(device.calls(), vec![DeviceCall::WriteDigital(1, true)]);
    }

    #[test]
    fn test_failing_device_records_then_fails() {
        let mut device = MockDevice::new().failing(DeviceError::Hardware("bus".to_string()));
        assert!(device.read_digital(0).is_err());
        device.reboot();
        assert_eq!(
            device.calls(),
            vec![DeviceCall::ReadDigital(0), DeviceCall::Reboot]
        );
    }

    #[tokio::test]
    async fn test_mock_client_scripted_service() {
        let mut client = MockClient::new();
        client.push_message("t", "3:,:1");
        client.fail_next_service(ServiceError::Protocol("bad packet".to_string()));

        assert!(client.next_events(Duration::ZERO).await.is_err());
        let events = client.next_events(Duration::ZERO).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(client.next_events(Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_journal_orders_device_and_publish() {
        let journal = Journal::new();
        let mut device = MockDevice::new().with_journal(journal.clone());
        let mut client = MockClient::new().with_journal(journal.clone());

        client.publish("t", "4:,:1").await.unwrap();
        device.write_digital(2, false).unwrap();

        assert_eq!(
            journal.events(),
            vec![
                TraceEvent::Published("4:,:1".to_string()),
                TraceEvent::Device(DeviceCall::WriteDigital(2, false)),
            ]
        );
    }
}
