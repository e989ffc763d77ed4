use std::fmt::Write as _;

use crate::step::{shell_quote, Step};
use crate::template::BuildSpecification;

impl BuildSpecification {
    /// Renders the specification as a Dockerfile for inspection. The start
    /// and ready commands have no Dockerfile equivalent and trail as comments.
    pub fn to_dockerfile(&self) -> String {
        let mut out = format!("FROM {}\n", self.base_image);
        for step in &self.steps {
            let _ = match step {
                Step::Copy(copy) => {
                    let mut flags = String::new();
                    if let Some(owner) = &copy.owner {
                        let _ = write!(flags, "--chown={owner} ");
                    }
                    if let Some(mode) = &copy.permissions {
                        let _ = write!(flags, "--chmod={mode} ");
                    }
                    writeln!(
                        out,
                        "COPY {flags}{} {}",
                        copy.sources.join(" "),
                        copy.destination
                    )
                }
                Step::Run(run) => match &run.user {
                    Some(user) => writeln!(out, "USER {user}\nRUN {}", run.command),
                    None => writeln!(out, "RUN {}", run.command),
                },
                Step::Env(env) => writeln!(out, "ENV {}={}", env.key, shell_quote(&env.value)),
                Step::Workdir(workdir) => writeln!(out, "WORKDIR {}", workdir.path),
                Step::User(user) => writeln!(out, "USER {}", user.name),
            };
        }
        if let Some(start) = &self.start_command {
            let _ = writeln!(out, "# start: {start}");
        }
        if let Some(ready) = self.ready_command() {
            let _ = writeln!(out, "# ready: {ready}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::template::TemplateBuilder;
    use crate::{CopyStep, ReadinessProbe};

    #[test]
    fn dockerfile_lists_steps_in_order() {
        let mut copy = CopyStep::new(vec!["app".into()], "/srv/app");
        copy.owner = Some("app".into());
        let spec = TemplateBuilder::from_image("debian:12")
            .copy_step(copy)
            .env("GREETING", "hello world")
            .workdir("/srv/app")
            .run_as("make", "builder")
            .start_command("./serve", ReadinessProbe::file("/tmp/ready"))
            .build();
        assert_eq!(
            spec.to_dockerfile(),
            "FROM debian:12\n\
             COPY --chown=app app /srv/app\n\
             ENV GREETING='hello world'\n\
             WORKDIR /srv/app\n\
             USER builder\n\
             RUN make\n\
             # start: ./serve\n\
             # ready: [ -f /tmp/ready ]\n"
        );
    }
}
