pub mod rmi_dispatcher;
pub mod rmi_request;
