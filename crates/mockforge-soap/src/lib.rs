//! SOAP protocol support for the mockd engine: envelope parsing with
//! `roxmltree`, operation dispatch by `SOAPAction` header or envelope body
//! element name, and scripted XML response bodies with template expansion.

mod factory;
mod handler;

pub use factory::XmlSoapFactory;
pub use handler::SoapHandler;
