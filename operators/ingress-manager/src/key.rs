//! 工作项 key
//!
//! 命名空间资源的 key 为 `namespace/name`，集群级资源的 key 为 `name`。

use ingress_manager_common::{Error, Result};
use kube::Resource;

/// 由命名空间和名称拼接 key
pub fn join_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

/// 计算对象的 key
pub fn object_key<K: Resource>(obj: &K) -> Result<String> {
    let meta = obj.meta();
    let name = meta
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;

    Ok(join_key(meta.namespace.as_deref().unwrap_or_default(), name))
}

/// 将 key 拆分为 (namespace, name)
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok(("", name)),
        (Some(namespace), Some(name), None) if !name.is_empty() => Ok((namespace, name)),
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use kube::api::ObjectMeta;
    use rstest::rstest;

    #[rstest]
    #[case("ns/foo", ("ns", "foo"))]
    #[case("foo", ("", "foo"))]
    #[case("/foo", ("", "foo"))]
    fn test_split_valid_keys(#[case] key: &str, #[case] expected: (&str, &str)) {
        assert_eq!(split_key(key).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("ns/")]
    #[case("a/b/c")]
    fn test_split_invalid_keys(#[case] key: &str) {
        assert!(matches!(split_key(key), Err(Error::InvalidKey(k)) if k == key));
    }

    #[test]
    fn test_object_key() {
        let service = Service {
            metadata: ObjectMeta {
                name: Some("foo".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(object_key(&service).unwrap(), "ns/foo");
        assert_eq!(split_key(&object_key(&service).unwrap()).unwrap(), ("ns", "foo"));

        let unnamed = Service::default();
        assert!(matches!(object_key(&unnamed), Err(Error::MissingObjectKey(_))));
    }
}
