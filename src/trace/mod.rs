mod scan;
mod tracer;

pub use tracer::Tracer;
