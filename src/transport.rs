pub use peercall_tokio_transport::{
    TokioWebSocketTransport, TokioWebSocketTransportFactory, Transport, TransportEvent,
    TransportFactory,
};
