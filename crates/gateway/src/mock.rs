//! Scripted gateway for tests: submit/poll answers are queued up front and
//! every call is counted.

use super::{Channel, GatewayClient, GatewayError, GatewayFactory, PollKey, PollOutcome, SubmitAck};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MockGateway {
    submit_answers: Mutex<VecDeque<Result<SubmitAck, GatewayError>>>,
    poll_answers: Mutex<VecDeque<Result<PollOutcome, GatewayError>>>,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_submit(&self, answer: Result<SubmitAck, GatewayError>) {
        self.submit_answers
            .lock()
            .expect("mock lock")
            .push_back(answer);
    }

    pub fn push_poll(&self, answer: Result<PollOutcome, GatewayError>) {
        self.poll_answers
            .lock()
            .expect("mock lock")
            .push_back(answer);
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn submit(&self, _filename: &str, _signed_xml: &[u8]) -> Result<SubmitAck, GatewayError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submit_answers
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(SubmitAck {
                    ticket: None,
                    reception_date: None,
                    message: "mock accepted".to_string(),
                })
            })
    }

    async fn poll(&self, _key: &PollKey) -> Result<PollOutcome, GatewayError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.poll_answers
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PollOutcome::InProcess {
                    detail: "mock in process".to_string(),
                })
            })
    }
}

/// Factory that hands out the same mock regardless of the selected channel,
/// remembering which channel was asked for last.
pub struct MockGatewayFactory {
    gateway: Arc<MockGateway>,
    last_channel: Mutex<Option<Channel>>,
}

impl MockGatewayFactory {
    pub fn new(gateway: Arc<MockGateway>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            last_channel: Mutex::new(None),
        })
    }

    pub fn last_channel(&self) -> Option<Channel> {
        *self.last_channel.lock().expect("mock lock")
    }
}

impl GatewayFactory for MockGatewayFactory {
    fn gateway_for(&self, channel: Channel) -> Result<Arc<dyn GatewayClient>, GatewayError> {
        *self.last_channel.lock().expect("mock lock") = Some(channel);
        Ok(Arc::clone(&self.gateway) as Arc<dyn GatewayClient>)
    }
}
