//! DNS request handler in front of a [`Resolver`].

use async_trait::async_trait;
use hickory_proto::op::{Header, ResponseCode};
use hickory_server::authority::{Catalog, MessageResponseBuilder};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::metrics::{self, QueryResult, Timer};
use crate::resolver::{Answer, Resolution, Resolver};

/// Answers queries from the index and hands everything else to `next`.
///
/// `next` receives queries outside the configured zones, queries of
/// unsupported types, and negative answers covered by fallthrough. The
/// default, an empty [`Catalog`], refuses them.
pub struct HostportHandler<N = Catalog> {
    resolver: Arc<Resolver>,
    next: N,
}

impl HostportHandler<Catalog> {
    /// Handler with no next handler configured.
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self::with_next(resolver, Catalog::new())
    }
}

impl<N: RequestHandler> HostportHandler<N> {
    /// Handler delegating to `next`.
    pub fn with_next(resolver: Arc<Resolver>, next: N) -> Self {
        Self { resolver, next }
    }

    async fn send_answer<R: ResponseHandler>(
        request: &Request,
        answer: Answer,
        mut response_handle: R,
    ) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(answer.response_code);

        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            answer.answers.iter(),
            std::iter::empty(),
            answer.authority.iter(),
            std::iter::empty(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to send DNS response: {}", e);
                Self::failed(request)
            }
        }
    }

    async fn send_error<R: ResponseHandler>(
        request: &Request,
        code: ResponseCode,
        mut response_handle: R,
    ) -> ResponseInfo {
        let response = MessageResponseBuilder::from_message_request(request)
            .error_msg(request.header(), code);

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to send DNS error response: {}", e);
                Self::failed(request)
            }
        }
    }

    fn failed(request: &Request) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(ResponseCode::ServFail);
        header.into()
    }
}

#[async_trait]
impl<N: RequestHandler> RequestHandler for HostportHandler<N> {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();

        let info = match request.request_info() {
            Ok(info) => info,
            Err(e) => {
                debug!("Rejecting request without a single question: {}", e);
                return Self::send_error(request, ResponseCode::FormErr, response_handle).await;
            }
        };

        let query = info.query.original();
        let rtype = query.query_type().to_string();

        match self.resolver.resolve(query) {
            Ok(Resolution::PassThrough) => {
                metrics::record_query(&rtype, QueryResult::PassThrough, timer.elapsed());
                self.next.handle_request(request, response_handle).await
            }
            Ok(Resolution::Fallthrough) => {
                debug!(name = %query.name(), "no instances, falling through");
                metrics::record_query(&rtype, QueryResult::Fallthrough, timer.elapsed());
                self.next.handle_request(request, response_handle).await
            }
            Ok(Resolution::Answer(answer)) => {
                let result = if answer.response_code == ResponseCode::NXDomain {
                    QueryResult::NxDomain
                } else if !answer.authority.is_empty() {
                    QueryResult::Apex
                } else {
                    metrics::record_records_returned(answer.answers.len());
                    QueryResult::Success
                };
                metrics::record_query(&rtype, result, timer.elapsed());
                Self::send_answer(request, answer, response_handle).await
            }
            Err(e) => {
                warn!(name = %query.name(), rtype = %rtype, "Query failed: {}", e);
                metrics::record_query(&rtype, QueryResult::Error, timer.elapsed());
                Self::send_error(request, ResponseCode::ServFail, response_handle).await
            }
        }
    }
}
