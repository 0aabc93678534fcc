use std::sync::Arc;

use futures_util::stream::StreamExt;
use judge_core::{
    store::FileStore, JudgeConfig, JudgeService, Submission, SubmissionId, SubmitMode,
    SubmitRequest, Verdict,
};
use lapin::{
    options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Result,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_amqp::*;

const TASK_QUEUE: &str = "judge_tasks";
const RESULT_QUEUE: &str = "judge_results";

/// Messages read from `judge_tasks`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Task {
    /// A scored submission; judged by the worker pool.
    Submit {
        #[serde(flatten)]
        request: SubmitRequest,
        #[serde(default)]
        correlation: Option<String>,
    },
    /// A sample-only run; judged right away and not stored.
    Test {
        #[serde(flatten)]
        request: SubmitRequest,
        #[serde(default)]
        correlation: Option<String>,
    },
    Status {
        id: SubmissionId,
        #[serde(default)]
        correlation: Option<String>,
    },
}

/// Messages written to `judge_results`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Reply {
    Queued {
        id: SubmissionId,
        position: usize,
        correlation: Option<String>,
    },
    Judged {
        submission: Submission,
    },
    Test {
        submission: Submission,
        correlation: Option<String>,
    },
    Status {
        id: SubmissionId,
        verdict: Option<Verdict>,
        position: usize,
        depth: usize,
        correlation: Option<String>,
    },
    Rejected {
        reason: String,
        correlation: Option<String>,
    },
}

struct Settings {
    amqp_addr: String,
    config: Option<String>,
    data_dir: String,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            amqp_addr: std::env::var("AMQP_ADDR")
                .unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".into()),
            config: std::env::var("JUDGE_CONFIG").ok(),
            data_dir: std::env::var("JUDGE_DATA").unwrap_or_else(|_| "judge_data".into()),
        }
    }
}

fn build_service(settings: &Settings) -> judge_core::error::Result<JudgeService> {
    let config = match &settings.config {
        Some(path) => JudgeConfig::from_file(path)?,
        None => JudgeConfig::default(),
    };
    let store = Arc::new(FileStore::open(&settings.data_dir)?);
    info!(
        "judging with {} workers, data in {}",
        config.workers, settings.data_dir
    );
    JudgeService::new(config, store)
}

async fn publish(channel: &Channel, reply: &Reply) -> Result<()> {
    let payload = match serde_json::to_vec(reply) {
        Ok(payload) => payload,
        Err(err) => {
            error!("failed to encode reply: {}", err);
            return Ok(());
        }
    };
    channel
        .basic_publish(
            "",
            RESULT_QUEUE,
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default(),
        )
        .await?
        .await?;
    Ok(())
}

fn handle(service: &Arc<JudgeService>, data: &[u8], replies: &mpsc::UnboundedSender<Reply>) {
    let task: Task = match serde_json::from_slice(data) {
        Ok(task) => task,
        Err(err) => {
            warn!("dropping malformed task: {}", err);
            let _ = replies.send(Reply::Rejected {
                reason: format!("malformed task: {}", err),
                correlation: None,
            });
            return;
        }
    };

    let reply = match task {
        Task::Submit {
            request,
            correlation,
        } => match service.submit(request, SubmitMode::Queued) {
            Ok(id) => Reply::Queued {
                id,
                position: service.queue_position(id),
                correlation,
            },
            Err(err) => Reply::Rejected {
                reason: err.to_string(),
                correlation,
            },
        },
        Task::Test {
            request,
            correlation,
        } => {
            // waits for a pool worker; the consumer keeps reading meanwhile
            let service = service.clone();
            let replies = replies.clone();
            tokio::spawn(async move {
                let result = tokio::task::spawn_blocking(move || service.submit_test(request)).await;
                let reply = match result {
                    Ok(Ok(submission)) => Reply::Test {
                        submission,
                        correlation,
                    },
                    Ok(Err(err)) => Reply::Rejected {
                        reason: err.to_string(),
                        correlation,
                    },
                    Err(err) => Reply::Rejected {
                        reason: format!("test run aborted: {}", err),
                        correlation,
                    },
                };
                let _ = replies.send(reply);
            });
            return;
        }
        Task::Status { id, correlation } => match service.submission(id) {
            Ok(submission) => Reply::Status {
                id,
                verdict: submission.map(|s| s.verdict),
                position: service.queue_position(id),
                depth: service.queue_depth(),
                correlation,
            },
            Err(err) => Reply::Rejected {
                reason: err.to_string(),
                correlation,
            },
        },
    };
    let _ = replies.send(reply);
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let settings = Settings::from_env();
    let service = match build_service(&settings) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            error!("failed to set up the judge: {}", err);
            std::process::exit(1);
        }
    };

    let conn = Connection::connect(
        &settings.amqp_addr,
        ConnectionProperties::default().with_tokio(),
    )
    .await?;
    let channel_task = conn.create_channel().await?;
    let channel_result = conn.create_channel().await?;

    for (channel, queue) in [(&channel_task, TASK_QUEUE), (&channel_result, RESULT_QUEUE)] {
        let declared = channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        info!("declare queue {:?}", declared);
    }

    let (replies, mut outbox) = mpsc::unbounded_channel::<Reply>();
    let finished = replies.clone();
    service.on_finished(Arc::new(move |submission: &Submission| {
        let _ = finished.send(Reply::Judged {
            submission: submission.clone(),
        });
    }));

    let publisher = tokio::spawn(async move {
        while let Some(reply) = outbox.recv().await {
            if let Err(err) = publish(&channel_result, &reply).await {
                error!("failed to publish reply: {}", err);
            }
        }
    });

    // leftovers from the last run go first
    let starter = service.clone();
    match tokio::task::spawn_blocking(move || starter.start()).await {
        Ok(Ok(recovered)) => info!("recovered {} submissions", recovered),
        Ok(Err(err)) => {
            error!("failed to start the judge queue: {}", err);
            std::process::exit(1);
        }
        Err(err) => {
            error!("failed to start the judge queue: {}", err);
            std::process::exit(1);
        }
    }

    let mut consumer = channel_task
        .basic_consume(
            TASK_QUEUE,
            "judge_server",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    info!("waiting for tasks on {}", TASK_QUEUE);

    loop {
        tokio::select! {
            delivery = consumer.next() => {
                let (_, delivery) = match delivery {
                    Some(delivery) => delivery?,
                    None => break,
                };
                handle(&service, &delivery.data, &replies);
                delivery.ack(BasicAckOptions::default()).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    let stopper = service.clone();
    if tokio::task::spawn_blocking(move || stopper.stop()).await.is_err() {
        warn!("judge queue did not stop cleanly");
    }
    drop(replies);
    drop(service);
    let _ = publisher.await;
    Ok(())
}
