// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! StatefulSet synthesis and the change predicates gating updates.

use super::{
    image_reference, labels, non_empty_or, pod_port, resource_requirements,
    storage::build_volume_claim_template,
};
use crate::constants::{defaults, names};
use crate::types::TangServer;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, ExecAction, LocalObjectReference, PodSpec, PodTemplateSpec, Probe,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

/// Build the desired StatefulSet for a TangServer
pub fn build_statefulset(tang_server: &TangServer) -> StatefulSet {
    let labels = labels(tang_server);
    let replicas = i32::try_from(tang_server.desired_replicas()).unwrap_or(i32::MAX);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(tang_server.statefulset_name()),
            namespace: tang_server.namespace(),
            labels: Some(labels.clone()),
            owner_references: tang_server.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: tang_server.service_name(),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(tang_server)),
            },
            volume_claim_templates: Some(vec![build_volume_claim_template(tang_server)]),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

fn build_pod_spec(tang_server: &TangServer) -> PodSpec {
    let container = Container {
        name: names::CONTAINER.to_string(),
        image: Some(image_reference(tang_server)),
        ports: Some(vec![ContainerPort {
            container_port: pod_port(tang_server),
            name: Some(names::CONTAINER.to_string()),
            ..Default::default()
        }]),
        liveness_probe: Some(health_probe(tang_server)),
        readiness_probe: Some(health_probe(tang_server)),
        volume_mounts: Some(vec![VolumeMount {
            mount_path: tang_server.key_path().to_string(),
            name: names::VOLUME_CLAIM.to_string(),
            ..Default::default()
        }]),
        resources: Some(resource_requirements(tang_server)),
        ..Default::default()
    };

    PodSpec {
        containers: vec![container],
        restart_policy: Some("Always".to_string()),
        image_pull_secrets: pull_secret(&tang_server.spec.secret).map(|s| vec![s]),
        ..Default::default()
    }
}

fn health_probe(tang_server: &TangServer) -> Probe {
    let script = non_empty_or(&tang_server.spec.health_script, defaults::HEALTH_SCRIPT);
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![script.to_string()]),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(15),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

fn pull_secret(name: &str) -> Option<LocalObjectReference> {
    if name.is_empty() {
        return None;
    }
    Some(LocalObjectReference {
        name: name.to_string(),
    })
}

fn containers(statefulset: &StatefulSet) -> &[Container] {
    statefulset
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers.as_slice())
        .unwrap_or_default()
}

/// True when a container present in both StatefulSets, matched by name, runs a different image
pub fn image_changed(current: &StatefulSet, desired: &StatefulSet) -> bool {
    containers(current).iter().any(|curr| {
        containers(desired)
            .iter()
            .filter(|des| des.name == curr.name)
            .any(|des| des.image != curr.image)
    })
}

/// True when the cpu/memory requests or limits of the first container differ
pub fn resources_changed(current: &StatefulSet, desired: &StatefulSet) -> bool {
    let (Some(curr), Some(des)) = (containers(current).first(), containers(desired).first())
    else {
        return false;
    };

    let amount = |c: &Container, limits: bool, key: &str| {
        c.resources
            .as_ref()
            .and_then(|r| if limits { r.limits.as_ref() } else { r.requests.as_ref() })
            .and_then(|m| m.get(key))
            .map(|q| q.0.clone())
    };

    [(false, "cpu"), (false, "memory"), (true, "cpu"), (true, "memory")]
        .iter()
        .any(|(limits, key)| amount(curr, *limits, key) != amount(des, *limits, key))
}

/// Current replica count declared on a StatefulSet
pub fn declared_replicas(statefulset: &StatefulSet) -> i32 {
    statefulset
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceAmounts, TangServerSpec};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn make_tang_server(spec: TangServerSpec) -> TangServer {
        TangServer {
            metadata: ObjectMeta {
                name: Some("tang".to_string()),
                namespace: Some("nbde".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    fn with_containers(containers: Vec<(&str, &str)>) -> StatefulSet {
        StatefulSet {
            spec: Some(StatefulSetSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: containers
                            .into_iter()
                            .map(|(name, image)| Container {
                                name: name.to_string(),
                                image: Some(image.to_string()),
                                ..Default::default()
                            })
                            .collect(),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn first_container(statefulset: &StatefulSet) -> &Container {
        &containers(statefulset)[0]
    }

    #[test]
    fn test_zero_replicas_normalized_and_default_key_path() {
        let sts = build_statefulset(&make_tang_server(TangServerSpec {
            replicas: 0,
            key_path: String::new(),
            ..Default::default()
        }));

        assert_eq!(declared_replicas(&sts), defaults::REPLICAS as i32);
        let mount = &first_container(&sts).volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, defaults::KEY_PATH);
        assert_eq!(mount.name, names::VOLUME_CLAIM);
    }

    #[test]
    fn test_statefulset_naming_and_ownership() {
        let sts = build_statefulset(&make_tang_server(TangServerSpec::default()));

        assert_eq!(sts.metadata.name.as_deref(), Some("tangstatefulset-tang"));
        assert_eq!(sts.spec.as_ref().unwrap().service_name, "service-tang");
        let owner = &sts.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "TangServer");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_probes_use_health_script() {
        let sts = build_statefulset(&make_tang_server(TangServerSpec {
            health_script: "/opt/health.sh".to_string(),
            ..Default::default()
        }));
        let container = first_container(&sts);
        let command = |p: &Option<Probe>| {
            p.as_ref()
                .and_then(|p| p.exec.as_ref())
                .and_then(|e| e.command.clone())
        };

        assert_eq!(command(&container.liveness_probe), Some(vec!["/opt/health.sh".to_string()]));
        assert_eq!(command(&container.readiness_probe), Some(vec!["/opt/health.sh".to_string()]));
    }

    #[test]
    fn test_pull_secret_only_when_set() {
        let without = build_statefulset(&make_tang_server(TangServerSpec::default()));
        let pod = without.spec.unwrap().template.spec.unwrap();
        assert!(pod.image_pull_secrets.is_none());

        let with = build_statefulset(&make_tang_server(TangServerSpec {
            secret: "pull-secret".to_string(),
            ..Default::default()
        }));
        let pod = with.spec.unwrap().template.spec.unwrap();
        let secrets = pod.image_pull_secrets.unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].name, "pull-secret");
    }

    #[test]
    fn test_image_changed_same_images() {
        let a = with_containers(vec![("tangserver", "tang:v1")]);
        let b = with_containers(vec![("tangserver", "tang:v1")]);
        assert!(!image_changed(&a, &b));
        assert!(!image_changed(&b, &a));
    }

    #[test]
    fn test_image_changed_different_image() {
        let a = with_containers(vec![("tangserver", "tang:v1")]);
        let b = with_containers(vec![("tangserver", "tang:v2")]);
        assert!(image_changed(&a, &b));
        assert!(image_changed(&b, &a));
    }

    #[test]
    fn test_image_changed_ignores_unmatched_names() {
        let a = with_containers(vec![("tangserver", "tang:v1")]);
        let b = with_containers(vec![("sidecar", "other:v9")]);
        assert!(!image_changed(&a, &b));
        assert!(!image_changed(&b, &a));
    }

    #[test]
    fn test_image_changed_matches_any_pair() {
        let current = with_containers(vec![("sidecar", "side:v1"), ("tangserver", "tang:v1")]);
        let desired = with_containers(vec![("tangserver", "tang:v2")]);
        assert!(image_changed(&current, &desired));
        assert!(image_changed(&desired, &current));
    }

    #[test]
    fn test_image_changed_empty_side() {
        let empty = StatefulSet::default();
        let a = with_containers(vec![("tangserver", "tang:v1")]);
        assert!(!image_changed(&empty, &a));
        assert!(!image_changed(&a, &empty));
    }

    #[test]
    fn test_resources_changed() {
        let base = build_statefulset(&make_tang_server(TangServerSpec::default()));
        assert!(!resources_changed(&base, &base.clone()));

        let bigger = build_statefulset(&make_tang_server(TangServerSpec {
            resources_limit: ResourceAmounts {
                cpu: String::new(),
                memory: "512Mi".to_string(),
            },
            ..Default::default()
        }));
        assert!(resources_changed(&base, &bigger));
        assert!(resources_changed(&bigger, &base));
    }

    #[test]
    fn test_resources_changed_detects_request_change() {
        let base = build_statefulset(&make_tang_server(TangServerSpec::default()));
        let mut changed = base.clone();
        let container = &mut changed
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .containers[0];
        container
            .resources
            .as_mut()
            .unwrap()
            .requests
            .as_mut()
            .unwrap()
            .insert("cpu".to_string(), Quantity("150m".to_string()));

        assert!(resources_changed(&changed, &base));
    }

    #[test]
    fn test_resources_changed_without_containers() {
        let base = build_statefulset(&make_tang_server(TangServerSpec::default()));
        assert!(!resources_changed(&StatefulSet::default(), &base));
    }
}
