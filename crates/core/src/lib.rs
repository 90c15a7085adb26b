pub mod shared {
    pub mod constants;
    pub mod frame;
    pub mod media_descriptor;
    pub mod media_policy;
    pub mod settings;
    pub mod stage_config;
}

pub mod video {
    pub mod domain {
        pub mod frame_sink;
        pub mod frame_source;
        pub mod image_writer;
    }
    pub mod infrastructure;
}

pub mod stages {
    pub mod domain {
        pub mod stage;
        pub mod stage_params;
    }
    pub mod infrastructure;
}

pub mod jobs {
    pub mod domain {
        pub mod job_tracker;
        pub mod pipeline_job;
    }
}

pub mod pipeline {
    pub mod infrastructure;
    pub mod lazy_sink;
    pub mod pipeline_executor;
    pub mod pipeline_logger;
    pub mod pipeline_service;
    pub mod process_video_use_case;
    pub mod stage_chain;
    #[cfg(test)]
    pub(crate) mod test_support;
}
