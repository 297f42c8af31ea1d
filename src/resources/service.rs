// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Service synthesis and external URL derivation.

use super::{labels, pod_port, port_or_default};
use crate::constants::{defaults, names};
use crate::types::TangServer;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::debug;
use url::Url;

const SERVICE_TYPES: [&str; 3] = ["ClusterIP", "NodePort", "LoadBalancer"];
const DEFAULT_SERVICE_TYPE: &str = "LoadBalancer";

/// Port exposed by the Service
pub fn service_port(tang_server: &TangServer) -> i32 {
    port_or_default(tang_server.spec.service_listen_port, defaults::SERVICE_PORT)
}

/// Service type, unknown or empty values fall back to LoadBalancer
pub fn service_type(tang_server: &TangServer) -> &'static str {
    let requested = tang_server.spec.service_type.as_str();
    match SERVICE_TYPES.iter().find(|t| **t == requested) {
        Some(t) => t,
        None => {
            if !requested.is_empty() {
                debug!(
                    "Unknown service type '{}', using {}",
                    requested, DEFAULT_SERVICE_TYPE
                );
            }
            DEFAULT_SERVICE_TYPE
        }
    }
}

/// Build the desired Service for a TangServer
pub fn build_service(tang_server: &TangServer) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(tang_server.service_name()),
            namespace: tang_server.namespace(),
            labels: Some(labels(tang_server)),
            owner_references: tang_server.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type(tang_server).to_string()),
            selector: Some(labels(tang_server)),
            ports: Some(vec![ServicePort {
                name: Some(names::CONTAINER.to_string()),
                port: service_port(tang_server),
                target_port: Some(IntOrString::Int(pod_port(tang_server))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// True when the port or type of an existing Service differ from the desired one
pub fn service_changed(current: &Service, desired: &Service) -> bool {
    let summary = |svc: &Service| {
        svc.spec.as_ref().map(|s| {
            (
                s.type_.clone(),
                s.ports
                    .as_ref()
                    .map(|p| p.iter().map(|p| (p.port, p.target_port.clone())).collect::<Vec<_>>()),
            )
        })
    };
    summary(current) != summary(desired)
}

/// External URL of the Service: load balancer address when assigned, cluster IP otherwise
pub fn external_url(tang_server: &TangServer, service: &Service) -> Option<String> {
    let ingress_host = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()));

    let host = ingress_host.or_else(|| {
        service
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.clone())
            .filter(|ip| !ip.is_empty() && ip != "None")
    })?;

    http_url(&host, service_port(tang_server))
}

fn http_url(host: &str, port: i32) -> Option<String> {
    let mut url = Url::parse("http://localhost").ok()?;
    url.set_host(Some(host)).ok()?;
    url.set_port(u16::try_from(port).ok()).ok()?;
    Some(url.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TangServerSpec;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};

    fn make_tang_server(spec: TangServerSpec) -> TangServer {
        TangServer {
            metadata: ObjectMeta {
                name: Some("test-server".to_string()),
                namespace: Some("test-namespace".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    fn with_ingress(ingress: LoadBalancerIngress) -> Service {
        Service {
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![ingress]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_service_port_explicit_and_default() {
        let mut ts = make_tang_server(TangServerSpec {
            service_listen_port: 8080,
            ..Default::default()
        });
        assert_eq!(service_port(&ts), 8080);

        ts.spec.service_listen_port = 0;
        assert_eq!(service_port(&ts), defaults::SERVICE_PORT as i32);
    }

    #[test]
    fn test_service_type_known_values() {
        for t in ["LoadBalancer", "ClusterIP", "NodePort"] {
            let ts = make_tang_server(TangServerSpec {
                service_type: t.to_string(),
                ..Default::default()
            });
            assert_eq!(service_type(&ts), t);
        }
    }

    #[test]
    fn test_service_type_empty_defaults_to_load_balancer() {
        let ts = make_tang_server(TangServerSpec::default());
        assert_eq!(service_type(&ts), "LoadBalancer");
    }

    #[test]
    fn test_service_type_invalid_defaults_to_load_balancer() {
        let ts = make_tang_server(TangServerSpec {
            service_type: "InvalidType".to_string(),
            ..Default::default()
        });
        assert_eq!(service_type(&ts), "LoadBalancer");
    }

    #[test]
    fn test_build_service() {
        let svc = build_service(&make_tang_server(TangServerSpec {
            service_listen_port: 7500,
            pod_listen_port: 7500,
            ..Default::default()
        }));
        let spec = svc.spec.unwrap();
        let port = &spec.ports.unwrap()[0];

        assert_eq!(svc.metadata.name.as_deref(), Some("service-test-server"));
        assert_eq!(port.port, 7500);
        assert_eq!(port.target_port, Some(IntOrString::Int(7500)));
        assert_eq!(spec.selector.unwrap()["app"], "test-server");
    }

    #[test]
    fn test_service_changed() {
        let ts = make_tang_server(TangServerSpec::default());
        let desired = build_service(&ts);
        assert!(!service_changed(&desired, &desired.clone()));

        let mut other = make_tang_server(TangServerSpec::default());
        other.spec.service_type = "NodePort".to_string();
        assert!(service_changed(&desired, &build_service(&other)));
    }

    #[test]
    fn test_external_url_from_hostname() {
        let ts = make_tang_server(TangServerSpec {
            service_listen_port: 8090,
            ..Default::default()
        });
        let svc = with_ingress(LoadBalancerIngress {
            hostname: Some("mylocalhost".to_string()),
            ..Default::default()
        });
        assert_eq!(
            external_url(&ts, &svc).as_deref(),
            Some("http://mylocalhost:8090")
        );
    }

    #[test]
    fn test_external_url_prefers_ip() {
        let ts = make_tang_server(TangServerSpec {
            service_listen_port: 8090,
            ..Default::default()
        });
        let svc = with_ingress(LoadBalancerIngress {
            ip: Some("1.2.3.4".to_string()),
            hostname: Some("mylocalhost".to_string()),
            ..Default::default()
        });
        assert_eq!(external_url(&ts, &svc).as_deref(), Some("http://1.2.3.4:8090"));
    }

    #[test]
    fn test_external_url_falls_back_to_cluster_ip() {
        let ts = make_tang_server(TangServerSpec::default());
        let svc = Service {
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.0.0.7".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        // Default port 80 is implied by the http scheme
        assert_eq!(external_url(&ts, &svc).as_deref(), Some("http://10.0.0.7"));
    }

    #[test]
    fn test_external_url_none_without_address() {
        let ts = make_tang_server(TangServerSpec::default());
        assert!(external_url(&ts, &Service::default()).is_none());
    }
}
