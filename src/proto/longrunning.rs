//! `google.longrunning`

/// A long-running operation as listed by the Operations service.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Operation {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<::prost_types::Any>,
    #[prost(bool, tag = "3")]
    pub done: bool,
    #[prost(oneof = "operation::Outcome", tags = "4, 5")]
    pub outcome: Option<operation::Outcome>,
}

pub mod operation {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Outcome {
        #[prost(message, tag = "4")]
        Error(super::super::rpc::Status),
        #[prost(message, tag = "5")]
        Response(::prost_types::Any),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListOperationsRequest {
    #[prost(string, tag = "4")]
    pub name: String,
    #[prost(string, tag = "1")]
    pub filter: String,
    #[prost(int32, tag = "2")]
    pub page_size: i32,
    #[prost(string, tag = "3")]
    pub page_token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListOperationsResponse {
    #[prost(message, repeated, tag = "1")]
    pub operations: Vec<Operation>,
    #[prost(string, tag = "2")]
    pub next_page_token: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetOperationRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelOperationRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}
