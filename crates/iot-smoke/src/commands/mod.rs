pub mod coap_cmd;
pub mod http_cmd;
pub mod pub_cmd;
pub mod smoke_cmd;
pub mod sub_cmd;
