//! Hornbill XMLMC remote procedure interface.
//!
//! Every call is an XML `<methodCall service=".." method="..">` POSTed to
//! `<endpoint>/<service>/?method=<method>`; the reply is a
//! `<methodCallResult status="ok|fail">` document.

mod call;
mod client;
mod response;

pub use call::{MethodCall, Param, Params};
pub use client::{TargetApi, XmlmcClient};
pub use response::{MethodResponse, XmlNode};

/// Service Manager application id.
pub const APP_SERVICE_MANAGER: &str = "com.hornbill.servicemanager";
