//! JSON-RPC request handler for Unix socket transport

use tracing::debug;

use crate::{
    core::{dispatcher::DeviceHandle, error::ControllerResult, types::Outcome},
    protocol::{
        JsonRpcError, JsonRpcRequest, JsonRpcResponse, OutcomeResponse, Request, Response,
        ServiceResponse, ServicesResponse, StatusResponse,
    },
};

/// Translates JSON-RPC requests into device operations
#[derive(Debug, Clone)]
pub struct RequestHandler {
    device: DeviceHandle,
}

impl RequestHandler {
    pub fn new(device: DeviceHandle) -> Self {
        Self { device }
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        let method = method_name(&request.request);

        let result = match request.request {
            Request::Scan => outcome(self.device.scan().await),
            Request::ListServices => self
                .device
                .services()
                .await
                .map(|services| Response::Services(ServicesResponse::ok(services))),
            Request::GetService(params) => match params.to_service_request() {
                Ok(service) => self
                    .device
                    .get_service(service)
                    .await
                    .map(|snapshot| Response::Service(ServiceResponse::ok(snapshot))),
                Err(message) => {
                    return JsonRpcResponse::error(JsonRpcError::invalid_params(message), id);
                }
            },
            Request::ConfigureService(params) => outcome(
                self.device
                    .configure_service(params.id, params.settings())
                    .await,
            ),
            Request::Connect(params) => outcome(self.device.connect_to(params.id).await),
            Request::Disconnect(params) => outcome(self.device.disconnect_from(params.id).await),
            Request::DisableService(params) => {
                outcome(self.device.disable_service(params.id).await)
            }
            Request::ClearCredentials(params) => {
                outcome(self.device.clear_credentials(params.id).await)
            }
            Request::GetStatus => self
                .device
                .status()
                .await
                .map(|status| Response::Status(StatusResponse::ok(status))),
            Request::ReportConnectivity(params) => outcome(
                self.device
                    .report_connectivity(params.id, params.connectivity)
                    .await,
            ),
            Request::UpdateConfig(update) => outcome(self.device.update_config(update).await),
            Request::AfterResume => {
                outcome(self.device.after_resume().await.map(|()| Outcome::Done))
            }
        };

        match result {
            Ok(response) => JsonRpcResponse::success(response, id),
            Err(error) => {
                debug!(method, %error, "request failed");
                JsonRpcResponse::error(JsonRpcError::from(&error), id)
            }
        }
    }
}

fn outcome(result: ControllerResult<Outcome>) -> ControllerResult<Response> {
    result.map(|outcome| Response::Outcome(OutcomeResponse::ok(outcome)))
}

fn method_name(request: &Request) -> &'static str {
    match request {
        Request::Scan => "scan",
        Request::ListServices => "list_services",
        Request::GetService(_) => "get_service",
        Request::ConfigureService(_) => "configure_service",
        Request::Connect(_) => "connect",
        Request::Disconnect(_) => "disconnect",
        Request::DisableService(_) => "disable_service",
        Request::ClearCredentials(_) => "clear_credentials",
        Request::GetStatus => "get_status",
        Request::ReportConnectivity(_) => "report_connectivity",
        Request::UpdateConfig(_) => "update_config",
        Request::AfterResume => "after_resume",
    }
}
