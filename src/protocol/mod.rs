//! Protocol message definitions

pub mod jsonrpc;
pub mod request;
pub mod response;

pub use crate::core::notification::Notification;
pub use {
    jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId},
    request::{
        ConfigureServiceParams, GetServiceParams, ReportConnectivityParams, Request,
        ServiceParams,
    },
    response::{
        OutcomeResponse, Response, ServiceResponse, ServicesResponse, StatusResponse,
    },
};
