//! Ingress 构建模块
//!
//! 根据 Service 构建期望的 Ingress：同命名空间、同名，
//! 带有指向该 Service 的 controller owner reference，
//! 以及一条把 `/` 路由到 Service 固定端口的规则。
//! 该模块不做任何 I/O，相同的输入总是得到相同的输出。

use ingress_manager_common::{Error, IngressConfig, Result};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::Resource;

/// 路由路径
const ROOT_PATH: &str = "/";

/// 路径匹配类型
const PATH_TYPE_PREFIX: &str = "Prefix";

/// 构建指向 Service 的 controller owner reference
pub fn controller_owner_ref(service: &Service) -> Result<OwnerReference> {
    let name = service
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let uid = service
        .metadata
        .uid
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;

    Ok(OwnerReference {
        api_version: Service::API_VERSION.to_string(),
        kind: Service::KIND.to_string(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// 根据 Service 构建期望的 Ingress
pub fn build_ingress(service: &Service, template: &IngressConfig) -> Result<Ingress> {
    let owner = controller_owner_ref(service)?;
    let name = owner.name.clone();

    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: name.clone(),
            port: Some(ServiceBackendPort {
                number: Some(template.backend_port),
                name: None,
            }),
        }),
        resource: None,
    };

    let rule = IngressRule {
        host: Some(template.host.clone()),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some(ROOT_PATH.to_string()),
                path_type: PATH_TYPE_PREFIX.to_string(),
                backend,
            }],
        }),
    };

    Ok(Ingress {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: service.metadata.namespace.clone(),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: template.class_name.clone(),
            rules: Some(vec![rule]),
            ..Default::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("foo".to_string()),
                namespace: Some("ns".to_string()),
                uid: Some("1234-abcd".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_build_ingress_matches_service() {
        let ingress = build_ingress(&service(), &IngressConfig::default()).unwrap();

        assert_eq!(ingress.metadata.name.as_deref(), Some("foo"));
        assert_eq!(ingress.metadata.namespace.as_deref(), Some("ns"));

        let owners = ingress.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Service");
        assert_eq!(owners[0].api_version, "v1");
        assert_eq!(owners[0].name, "foo");
        assert_eq!(owners[0].uid, "1234-abcd");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(owners[0].block_owner_deletion, Some(true));

        let spec = ingress.spec.unwrap();
        assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
        let rules = spec.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].host.as_deref(), Some("baerwang.com"));

        let paths = &rules[0].http.as_ref().unwrap().paths;
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path.as_deref(), Some("/"));
        assert_eq!(paths[0].path_type, "Prefix");
        let backend = paths[0].backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "foo");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(80));
    }

    #[test]
    fn test_build_ingress_uses_template() {
        let template = IngressConfig {
            host: "apps.example.com".to_string(),
            class_name: None,
            backend_port: 8080,
        };
        let ingress = build_ingress(&service(), &template).unwrap();
        let spec = ingress.spec.unwrap();

        assert_eq!(spec.ingress_class_name, None);
        let rules = spec.rules.unwrap();
        assert_eq!(rules[0].host.as_deref(), Some("apps.example.com"));
        let backend = rules[0].http.as_ref().unwrap().paths[0].backend.service.clone().unwrap();
        assert_eq!(backend.port.unwrap().number, Some(8080));
    }

    #[test]
    fn test_build_ingress_is_deterministic() {
        let template = IngressConfig::default();
        assert_eq!(
            build_ingress(&service(), &template).unwrap(),
            build_ingress(&service(), &template).unwrap()
        );
    }

    #[test]
    fn test_build_ingress_requires_uid() {
        let mut service = service();
        service.metadata.uid = None;
        assert!(matches!(
            build_ingress(&service, &IngressConfig::default()),
            Err(Error::MissingObjectKey(".metadata.uid"))
        ));
    }
}
