//! Response-phase handling: evict a dead upstream session on 404, always
//! rewrite `mcp-session-id` back to the downstream's own token, and answer
//! the phases this service never mutates. The proxy blocks on a reply for
//! every phase it is configured to send, so even ignored phases get an
//! explicit pass-through.

use gateway_proto::ext_proc::processing_response::Response as RpcResponse;
use gateway_proto::ext_proc::{
    BodyResponse, CommonResponse, CommonResponseStatus, HeadersResponse, ProcessingResponse,
    TrailersResponse,
};
use shared::primitives::WrappedUuidV4;
use tracing::debug;

use crate::dispatch::MCP_SESSION_HEADER;
use crate::headers::HeaderMutationBuilder;
use crate::state::RouterState;

pub struct ResponseContext {
    pub downstream_session: Option<WrappedUuidV4>,
    pub downstream_token: Option<String>,
    pub upstream_id: Option<String>,
    pub upstream_status: Option<u16>,
}

pub fn handle_response_headers(state: &RouterState, ctx: &ResponseContext) -> ProcessingResponse {
    if ctx.upstream_status == Some(404) {
        if let (Some(downstream), Some(upstream_id)) = (&ctx.downstream_session, &ctx.upstream_id) {
            debug!(downstream = %downstream, upstream = %upstream_id, "upstream rejected session, evicting");
            state
                .session_cache
                .remove_upstream_session(downstream, upstream_id);
        }
    }

    let mut builder = HeaderMutationBuilder::default();
    if let Some(token) = &ctx.downstream_token {
        builder = builder.set(MCP_SESSION_HEADER, token.clone());
    }

    ProcessingResponse {
        response: Some(RpcResponse::ResponseHeaders(HeadersResponse {
            response: Some(CommonResponse {
                status: CommonResponseStatus::Continue as i32,
                header_mutation: Some(builder.build()),
                body_mutation: None,
                clear_route_cache: false,
            }),
        })),
    }
}

pub fn passthrough_response_body() -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RpcResponse::ResponseBody(BodyResponse {
            response: Some(CommonResponse {
                status: CommonResponseStatus::Continue as i32,
                header_mutation: None,
                body_mutation: None,
                clear_route_cache: false,
            }),
        })),
    }
}

pub fn passthrough_request_trailers() -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RpcResponse::RequestTrailers(TrailersResponse {
            header_mutation: None,
        })),
    }
}

pub fn passthrough_response_trailers() -> ProcessingResponse {
    ProcessingResponse {
        response: Some(RpcResponse::ResponseTrailers(TrailersResponse {
            header_mutation: None,
        })),
    }
}
