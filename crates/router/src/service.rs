//! The `ExternalProcessor::Process` streaming handler: drives one HTTP
//! exchange's phases (request headers → request body → response headers)
//! through `dispatch`/`response`, carrying header state between phases on the
//! stack of the per-stream task. Grounded on `a2a-rs`'s `tonic::async_trait`
//! service-impl shape (`self: Arc<Self>`, a spawned forwarding task bridging
//! the inbound `Streaming<T>` to an outbound `mpsc`-backed response stream).

use std::collections::HashMap;
use std::pin::Pin;

use gateway_proto::ext_proc::external_processor_server::ExternalProcessor;
use gateway_proto::ext_proc::processing_request::Request as RpcRequestVariant;
use gateway_proto::ext_proc::{ProcessingRequest, ProcessingResponse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::dispatch::{self, HeaderBag, MCP_SESSION_HEADER};
use crate::response::{self, ResponseContext};
use crate::state::RouterState;

pub struct RouterService {
    state: std::sync::Arc<RouterState>,
}

impl RouterService {
    pub fn new(state: std::sync::Arc<RouterState>) -> Self {
        Self { state }
    }
}

fn collect_headers(map: &gateway_proto::ext_proc::HeaderMap) -> HeaderBag {
    map.headers
        .iter()
        .map(|h| (h.key.to_ascii_lowercase(), h.value.clone()))
        .collect()
}

#[tonic::async_trait]
impl ExternalProcessor for RouterService {
    type ProcessStream = Pin<Box<dyn Stream<Item = Result<ProcessingResponse, Status>> + Send>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let state = self.state.clone();

        tokio::spawn(async move {
            let mut request_headers: HeaderBag = HashMap::new();
            let mut ctx = ResponseContext {
                downstream_session: None,
                downstream_token: None,
                upstream_id: None,
                upstream_status: None,
            };

            while let Some(item) = inbound.next().await {
                let message = match item {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "ext_proc stream error");
                        break;
                    }
                };

                let response = match message.request {
                    Some(RpcRequestVariant::RequestHeaders(headers)) => {
                        let bag = collect_headers(headers.headers.as_ref().unwrap_or(&Default::default()));
                        let (resp, captured) = dispatch::handle_request_headers(&state, &bag).await;
                        request_headers = captured;
                        if let Some(token) = request_headers.get(MCP_SESSION_HEADER) {
                            ctx.downstream_token = Some(token.clone());
                            ctx.downstream_session = state.session_tokens.validate(token).ok().map(|v| v.session_id);
                        }
                        resp
                    }
                    Some(RpcRequestVariant::RequestBody(body)) => {
                        let outcome =
                            dispatch::handle_request_body(&state, &request_headers, &body.body).await;
                        if outcome.upstream_id.is_some() {
                            ctx.upstream_id = outcome.upstream_id;
                        }
                        outcome.response
                    }
                    Some(RpcRequestVariant::ResponseHeaders(headers)) => {
                        let bag = collect_headers(headers.headers.as_ref().unwrap_or(&Default::default()));
                        if let Some(status) = bag.get(":status").and_then(|s| s.parse::<u16>().ok()) {
                            ctx.upstream_status = Some(status);
                        }
                        response::handle_response_headers(&state, &ctx)
                    }
                    Some(RpcRequestVariant::ResponseBody(_)) => response::passthrough_response_body(),
                    Some(RpcRequestVariant::RequestTrailers(_)) => {
                        response::passthrough_request_trailers()
                    }
                    Some(RpcRequestVariant::ResponseTrailers(_)) => {
                        response::passthrough_response_trailers()
                    }
                    None => {
                        debug!("empty ext_proc message");
                        continue;
                    }
                };

                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
