mod argument_injection;
mod code_injection;
mod envvar_injection;
mod output_clobbering;
mod reusable_workflow_taint;
mod untrusted_cache_key;
