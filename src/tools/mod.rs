//! 工具集：注册表、执行器与全部容器化链路工具
//!
//! register_all 是链路拓扑的唯一出处：每个工具的依赖声明与
//! 下一步提示都定义在这里。

pub mod analyze;
pub mod build;
pub mod cluster;
pub mod command;
pub mod deploy;
pub mod dockerfile;
pub mod executor;
pub mod manifests;
pub mod push;
pub mod registry;
pub mod scan;
pub mod sessions;
pub mod tag;
pub mod verify;
pub mod workflow;

use std::sync::Arc;

use crate::core::error::ToolError;
use crate::session::SessionManager;
use registry::{ToolCategory, ToolMetadata, ToolRegistry};

/// 注册全部工具；任何重名让启动失败
pub fn register_all(
    registry: &Arc<ToolRegistry>,
    sessions: &Arc<SessionManager>,
) -> Result<(), ToolError> {
    registry.register(
        Arc::new(analyze::AnalyzeTool),
        ToolMetadata::new(
            "analyze_repository",
            "Analyze a repository: detect language, framework, port and build files",
            ToolCategory::Workflow,
        )
        .chain("generate_dockerfile", "Analysis is stored; generate a Dockerfile from it")
        .schema::<analyze::AnalyzeArgs>(),
    )?;

    registry.register(
        Arc::new(dockerfile::DockerfileTool),
        ToolMetadata::new(
            "generate_dockerfile",
            "Generate a Dockerfile from the stored repository analysis",
            ToolCategory::Workflow,
        )
        .chain("build_image", "Dockerfile is ready; build the container image")
        .requires(&["analyze_repository"])
        .schema::<dockerfile::DockerfileArgs>(),
    )?;

    registry.register(
        Arc::new(build::BuildTool),
        ToolMetadata::new(
            "build_image",
            "Build a container image with docker build",
            ToolCategory::Workflow,
        )
        .chain("scan_image", "Image built; scan it for vulnerabilities")
        .requires(&["generate_dockerfile"])
        .schema::<build::BuildArgs>(),
    )?;

    registry.register(
        Arc::new(scan::ScanTool),
        ToolMetadata::new(
            "scan_image",
            "Scan the built image for vulnerabilities with trivy",
            ToolCategory::Workflow,
        )
        .chain("tag_image", "Scan done; tag the image for the registry")
        .requires(&["build_image"]),
    )?;

    registry.register(
        Arc::new(tag::TagTool),
        ToolMetadata::new(
            "tag_image",
            "Tag the built image with a registry reference",
            ToolCategory::Workflow,
        )
        .chain("push_image", "Image tagged; push it to the registry")
        .requires(&["build_image"])
        .schema::<tag::TagArgs>(),
    )?;

    registry.register(
        Arc::new(push::PushTool),
        ToolMetadata::new(
            "push_image",
            "Push the tagged image to its registry",
            ToolCategory::Workflow,
        )
        .chain(
            "generate_k8s_manifests",
            "Image pushed; generate Kubernetes manifests",
        )
        .requires(&["tag_image"]),
    )?;

    registry.register(
        Arc::new(manifests::ManifestTool),
        ToolMetadata::new(
            "generate_k8s_manifests",
            "Render Deployment and Service manifests for the image",
            ToolCategory::Workflow,
        )
        .chain("prepare_cluster", "Manifests ready; prepare the target cluster")
        .requires(&["build_image"])
        .schema::<manifests::ManifestArgs>(),
    )?;

    registry.register(
        Arc::new(cluster::ClusterTool),
        ToolMetadata::new(
            "prepare_cluster",
            "Check cluster connectivity and ensure the target namespace exists",
            ToolCategory::Workflow,
        )
        .chain("deploy_application", "Cluster ready; apply the manifests")
        .requires(&["generate_k8s_manifests"]),
    )?;

    registry.register(
        Arc::new(deploy::DeployTool),
        ToolMetadata::new(
            "deploy_application",
            "Apply the generated manifests with kubectl",
            ToolCategory::Workflow,
        )
        .chain("verify_deployment", "Applied; verify the rollout completes")
        .requires(&["prepare_cluster"]),
    )?;

    registry.register(
        Arc::new(verify::VerifyTool),
        ToolMetadata::new(
            "verify_deployment",
            "Wait for the rollout to complete and report pod status",
            ToolCategory::Workflow,
        )
        .requires(&["deploy_application"]),
    )?;

    registry.register(
        Arc::new(workflow::StartWorkflowTool::new(Arc::clone(sessions))),
        ToolMetadata::new(
            "start_workflow",
            "Create a session and run the first analysis step",
            ToolCategory::Orchestration,
        )
        .chain("generate_dockerfile", "Session started and repository analyzed")
        .schema::<workflow::StartWorkflowArgs>(),
    )?;

    registry.register(
        Arc::new(workflow::WorkflowStatusTool::new(Arc::clone(sessions))),
        ToolMetadata::new(
            "workflow_status",
            "Report workflow progress for a session",
            ToolCategory::Orchestration,
        )
        .schema::<workflow::WorkflowStatusArgs>(),
    )?;

    registry.register(
        Arc::new(sessions::ListSessionsTool::new(Arc::clone(sessions))),
        ToolMetadata::new(
            "list_sessions",
            "List all workflow sessions",
            ToolCategory::Utility,
        ),
    )?;

    registry.register(
        Arc::new(sessions::DeleteSessionTool::new(Arc::clone(sessions))),
        ToolMetadata::new(
            "delete_session",
            "Delete a workflow session",
            ToolCategory::Utility,
        )
        .schema::<sessions::DeleteSessionArgs>(),
    )?;

    registry.register(
        Arc::new(sessions::ListToolsTool::new(Arc::clone(registry))),
        ToolMetadata::new(
            "list_tools",
            "List registered tools with their chain hints",
            ToolCategory::Utility,
        ),
    )?;

    Ok(())
}
