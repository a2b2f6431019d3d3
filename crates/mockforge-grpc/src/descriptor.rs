//! Proto compilation: turns a mock's `proto_dir`/`proto_files`/`import_paths`
//! into a [`DescriptorPool`] without shelling out to `protoc`.

use std::path::{Path, PathBuf};

use mockforge_core::{Error, GrpcSpec, Result};
use prost_reflect::{DescriptorPool, MethodDescriptor, ServiceDescriptor};
use tracing::debug;

/// One compiled service and its methods, flattened for generic dispatch.
#[derive(Debug, Clone)]
pub struct CompiledService {
    /// Fully-qualified service name, e.g. `mockforge.greeter.Greeter`.
    pub full_name: String,
    pub(crate) methods: Vec<MethodDescriptor>,
}

impl CompiledService {
    fn from_descriptor(service: ServiceDescriptor) -> Self {
        let full_name = service.full_name().to_string();
        let methods = service.methods().collect();
        Self { full_name, methods }
    }

    /// Look up a method by its unqualified name (the last path segment of a
    /// gRPC request URI).
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name() == name)
    }
}

fn discover_proto_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current)
            .map_err(|e| Error::generic(format!("failed to read proto dir {}: {e}", current.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::generic(e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "proto") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Compile the proto files named by `spec` into a [`DescriptorPool`] and
/// flatten its services for generic dispatch.
pub fn compile(spec: &GrpcSpec) -> Result<Vec<CompiledService>> {
    let mut files = spec.proto_files.iter().map(PathBuf::from).collect::<Vec<_>>();
    if let Some(dir) = &spec.proto_dir {
        files.extend(discover_proto_files(Path::new(dir))?);
    }
    if files.is_empty() {
        return Err(Error::dormant("grpc mock requires proto_dir or proto_files"));
    }

    let mut includes: Vec<PathBuf> = spec.import_paths.iter().map(PathBuf::from).collect();
    if let Some(dir) = &spec.proto_dir {
        includes.push(PathBuf::from(dir));
    }
    if includes.is_empty() {
        includes.push(PathBuf::from("."));
    }

    debug!(files = files.len(), includes = includes.len(), "compiling proto files");
    let file_descriptor_set = protox::compile(&files, &includes)
        .map_err(|e| Error::generic(format!("failed to compile proto files: {e}")))?;
    let pool = DescriptorPool::from_file_descriptor_set(file_descriptor_set)
        .map_err(|e| Error::generic(format!("failed to build descriptor pool: {e}")))?;

    let services: Vec<CompiledService> = pool.services().map(CompiledService::from_descriptor).collect();
    if services.is_empty() {
        return Err(Error::validation("compiled proto files declare no services"));
    }
    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GREETER_PROTO: &str = r#"
        syntax = "proto3";
        package mockforge.greeter;

        message HelloRequest {
            string name = 1;
        }
        message HelloReply {
            string message = 1;
        }
        service Greeter {
            rpc SayHello (HelloRequest) returns (HelloReply);
        }
    "#;

    fn write_proto(dir: &tempfile::TempDir) {
        let path = dir.path().join("greeter.proto");
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(GREETER_PROTO.as_bytes()).unwrap();
    }

    #[test]
    fn compiles_a_single_service_from_proto_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_proto(&dir);
        let spec = GrpcSpec {
            port: 0,
            proto_dir: Some(dir.path().to_string_lossy().to_string()),
            proto_files: Vec::new(),
            import_paths: Vec::new(),
            responses: std::collections::HashMap::new(),
        };
        let services = compile(&spec).unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].full_name, "mockforge.greeter.Greeter");
        assert!(services[0].method("SayHello").is_some());
    }

    #[test]
    fn spec_with_no_proto_source_is_kept_dormant() {
        let spec = GrpcSpec {
            port: 0,
            proto_dir: None,
            proto_files: Vec::new(),
            import_paths: Vec::new(),
            responses: std::collections::HashMap::new(),
        };
        assert!(matches!(compile(&spec), Err(Error::Dormant { .. })));
    }
}
